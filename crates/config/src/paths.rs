//! On-disk layout of the two installation scopes.
//!
//! ```text
//! <scope-root>/registry.json
//! <scope-root>/version-history.json
//! <scope-root>/settings.json
//! <scope-root>/{type}s/<package-name>/.install-metadata.json
//! ```

use std::path::{Path, PathBuf};

use claude_skills_common::{ContentType, Scope};

/// Roots of the user-global (`~/.claude`) and project-local (`./.claude`) trees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaudePaths {
    pub global: PathBuf,
    pub local: PathBuf,
}

impl ClaudePaths {
    pub fn new(global: impl Into<PathBuf>, local: impl Into<PathBuf>) -> Self {
        Self {
            global: global.into(),
            local: local.into(),
        }
    }

    /// Resolve `~/.claude` and `<cwd>/.claude`.
    pub fn discover() -> anyhow::Result<Self> {
        let home = directories::BaseDirs::new()
            .map(|d| d.home_dir().to_path_buf())
            .ok_or_else(|| anyhow::anyhow!("could not determine the home directory"))?;
        let cwd = std::env::current_dir()?;
        Ok(Self::new(home.join(".claude"), cwd.join(".claude")))
    }

    pub fn install_dir(&self, scope: Scope) -> &Path {
        match scope {
            Scope::Global => &self.global,
            Scope::Local => &self.local,
        }
    }

    pub fn content_type_dir(&self, scope: Scope, content_type: ContentType) -> PathBuf {
        self.install_dir(scope).join(content_type.dir_name())
    }

    pub fn package_dir(&self, scope: Scope, content_type: ContentType, name: &str) -> PathBuf {
        self.content_type_dir(scope, content_type).join(name)
    }

    /// The host application's own settings file for a scope.
    pub fn settings_path(&self, scope: Scope) -> PathBuf {
        self.install_dir(scope).join("settings.json")
    }

    pub fn registry_path(&self, scope: Scope) -> PathBuf {
        self.install_dir(scope).join("registry.json")
    }

    pub fn history_path(&self, scope: Scope) -> PathBuf {
        self.install_dir(scope).join("version-history.json")
    }

    /// Audit entries always go to the global tree.
    pub fn audit_log_path(&self) -> PathBuf {
        self.global.join("audit.log")
    }

    /// Local if the project already has a `.claude` directory, otherwise global.
    pub fn detect_scope(&self) -> Scope {
        if self.local.exists() {
            Scope::Local
        } else {
            Scope::Global
        }
    }
}
