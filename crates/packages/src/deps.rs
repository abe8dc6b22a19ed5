use std::path::Path;

use {
    claude_skills_common::ContentType,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::registry::InstalledPackage;

/// Manifest file names, highest priority first.
pub const MANIFEST_CANDIDATES: &[&str] = &["package.json", "manifest.json", ".claude-install.json"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub peer_dependencies: Vec<Dependency>,
    /// Parsed for completeness; never installed automatically.
    #[serde(default)]
    pub optional_dependencies: Vec<Dependency>,
}

/// The first candidate manifest in `package_dir` that parses.
pub fn read_package_manifest(package_dir: &Path) -> Option<PackageManifest> {
    MANIFEST_CANDIDATES.iter().find_map(|file| {
        let path = package_dir.join(file);
        let data = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&data) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping unparsable manifest");
                None
            },
        }
    })
}

fn is_satisfied(dep: &Dependency, installed: &[InstalledPackage]) -> bool {
    installed.iter().any(|p| {
        p.name == dep.name
            && p.content_type == dep.content_type
            && dep.version.as_ref().is_none_or(|v| *v == p.version)
    })
}

/// Declared `dependencies` and `peerDependencies` not yet satisfied by
/// `installed`. Each keeps its own `optional` flag.
pub fn resolve_dependencies(
    manifest: &PackageManifest,
    installed: &[InstalledPackage],
) -> Vec<Dependency> {
    manifest
        .dependencies
        .iter()
        .chain(&manifest.peer_dependencies)
        .filter(|dep| !is_satisfied(dep, installed))
        .cloned()
        .collect()
}
