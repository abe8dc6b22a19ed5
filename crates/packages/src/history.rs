//! Per-scope record of every version installed for each package.

use std::{cmp::Ordering, path::PathBuf};

use {
    chrono::{DateTime, Utc},
    claude_skills_common::{ContentType, Result, Scope},
    claude_skills_config::ClaudePaths,
    serde::{Deserialize, Serialize},
};

use crate::store::{load_or_default, save_atomic};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: String,
    pub installed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<String>,
    #[serde(default)]
    pub breaking_changes: bool,
    pub can_rollback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageHistory {
    pub package_id: String,
    pub package_name: String,
    pub package_type: ContentType,
    pub versions: Vec<VersionInfo>,
    pub current_version: String,
}

/// `version-history.json` for one scope.
pub struct VersionHistory {
    path: PathBuf,
}

impl VersionHistory {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn for_scope(paths: &ClaudePaths, scope: Scope) -> Self {
        Self::new(paths.history_path(scope))
    }

    pub fn load(&self) -> Result<Vec<PackageHistory>> {
        load_or_default(&self.path)
    }

    /// Record that `version` of a package is now installed. A version seen
    /// before is not added twice, but always becomes current.
    pub fn record_installation(
        &self,
        package_id: &str,
        package_name: &str,
        package_type: ContentType,
        version: &str,
        changelog: Option<&str>,
    ) -> Result<()> {
        let mut history = self.load()?;
        let index = match history
            .iter()
            .position(|h| h.package_id == package_id && h.package_type == package_type)
        {
            Some(index) => index,
            None => {
                history.push(PackageHistory {
                    package_id: package_id.to_owned(),
                    package_name: package_name.to_owned(),
                    package_type,
                    versions: Vec::new(),
                    current_version: version.to_owned(),
                });
                history.len() - 1
            },
        };
        let entry = &mut history[index];

        if !entry.versions.iter().any(|v| v.version == version) {
            let can_rollback = !entry.versions.is_empty();
            entry.versions.push(VersionInfo {
                version: version.to_owned(),
                installed_at: Utc::now(),
                changelog: changelog.map(str::to_owned),
                breaking_changes: changelog
                    .is_some_and(|c| c.to_lowercase().contains("breaking")),
                can_rollback,
            });
        }
        entry.current_version = version.to_owned();

        save_atomic(&self.path, &history)
    }

    /// Versions other than the current one, newest first. Versions that are
    /// not valid semver sort last.
    pub fn rollback_versions(
        &self,
        package_name: &str,
        package_type: ContentType,
    ) -> Result<Vec<VersionInfo>> {
        let history = self.load()?;
        let Some(entry) = history
            .into_iter()
            .find(|h| h.package_name == package_name && h.package_type == package_type)
        else {
            return Ok(Vec::new());
        };

        let mut versions: Vec<VersionInfo> = entry
            .versions
            .into_iter()
            .filter(|v| v.version != entry.current_version)
            .collect();
        versions.sort_by(|a, b| newest_first(&a.version, &b.version));
        Ok(versions)
    }
}

fn newest_first(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => b.cmp(&a),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => Ordering::Equal,
    }
}
