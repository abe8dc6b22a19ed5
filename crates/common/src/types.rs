use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Category of installable marketplace content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Skill,
    Agent,
    Command,
    Hook,
    Plugin,
    Mcp,
    Settings,
}

impl ContentType {
    pub const ALL: [ContentType; 7] = [
        Self::Skill,
        Self::Agent,
        Self::Command,
        Self::Hook,
        Self::Plugin,
        Self::Mcp,
        Self::Settings,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Skill => "skill",
            Self::Agent => "agent",
            Self::Command => "command",
            Self::Hook => "hook",
            Self::Plugin => "plugin",
            Self::Mcp => "mcp",
            Self::Settings => "settings",
        }
    }

    /// Directory under a scope root holding packages of this type.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Skill => "skills",
            Self::Agent => "agents",
            Self::Command => "commands",
            Self::Hook => "hooks",
            Self::Plugin => "plugins",
            Self::Mcp => "mcps",
            Self::Settings => "settings",
        }
    }

    /// Top-level files a package of this type must ship.
    pub fn required_files(self) -> &'static [&'static str] {
        match self {
            Self::Skill => &["SKILL.md"],
            Self::Agent => &["AGENT.md"],
            Self::Command | Self::Hook => &[],
            Self::Plugin => &["plugin.json", "manifest.json"],
            Self::Mcp => &["mcp.json"],
            Self::Settings => &["settings.json"],
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| {
                Error::message(format!(
                    "unknown content type '{s}' (expected one of: skill, agent, command, hook, plugin, mcp, settings)"
                ))
            })
    }
}

/// Installation scope: the user-global tree or the current project's tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Global,
    Local,
}

impl Scope {
    pub const BOTH: [Scope; 2] = [Self::Global, Self::Local];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
