use std::path::{Path, PathBuf};

use {
    chrono::{DateTime, Utc},
    claude_skills_common::{ContentType, Result, Scope},
    claude_skills_config::ClaudePaths,
    serde::{Deserialize, Serialize},
    tracing::{debug, info},
};

use crate::store::{load_or_default, save_atomic};

const REGISTRY_VERSION: &str = "1.0.0";

/// One installed package as recorded in `registry.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPackage {
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub version: String,
    pub installed_at: DateTime<Utc>,
    pub path: PathBuf,
    pub scope: Scope,
}

impl InstalledPackage {
    fn is(&self, name: &str, content_type: ContentType, scope: Scope) -> bool {
        self.name == name && self.content_type == content_type && self.scope == scope
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub packages: Vec<InstalledPackage>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    REGISTRY_VERSION.to_owned()
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            packages: Vec::new(),
            version: default_version(),
        }
    }
}

impl Registry {
    /// Insert `package`, replacing any record with the same
    /// (name, type, scope).
    pub fn add(&mut self, package: InstalledPackage) {
        self.remove(&package.name, package.content_type, package.scope);
        self.packages.push(package);
    }

    pub fn remove(&mut self, name: &str, content_type: ContentType, scope: Scope) -> bool {
        let before = self.packages.len();
        self.packages.retain(|p| !p.is(name, content_type, scope));
        self.packages.len() != before
    }

    pub fn find(&self, name: &str, content_type: ContentType, scope: Scope) -> Option<&InstalledPackage> {
        self.packages.iter().find(|p| p.is(name, content_type, scope))
    }
}

/// Persistent per-scope registry storage with atomic writes.
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn for_scope(paths: &ClaudePaths, scope: Scope) -> Self {
        Self::new(paths.registry_path(scope))
    }

    /// Load the registry, returning an empty one if missing or corrupt.
    pub fn load(&self) -> Result<Registry> {
        load_or_default(&self.path)
    }

    pub fn save(&self, registry: &Registry) -> Result<()> {
        save_atomic(&self.path, registry)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn add_to_registry(paths: &ClaudePaths, package: InstalledPackage) -> Result<()> {
    let store = RegistryStore::for_scope(paths, package.scope);
    let mut registry = store.load()?;
    debug!(package = %package.name, content_type = %package.content_type, scope = %package.scope, "recording package");
    registry.add(package);
    store.save(&registry)
}

/// Returns whether a record was removed.
pub fn remove_from_registry(
    paths: &ClaudePaths,
    name: &str,
    content_type: ContentType,
    scope: Scope,
) -> Result<bool> {
    let store = RegistryStore::for_scope(paths, scope);
    let mut registry = store.load()?;
    let removed = registry.remove(name, content_type, scope);
    if removed {
        store.save(&registry)?;
    }
    Ok(removed)
}

/// Create every content-type directory of `scope` and an empty registry.
///
/// An existing registry is left as it is. Returns the scope root.
pub fn init_scope(paths: &ClaudePaths, scope: Scope) -> Result<PathBuf> {
    for content_type in ContentType::ALL {
        std::fs::create_dir_all(paths.content_type_dir(scope, content_type))?;
    }
    let store = RegistryStore::for_scope(paths, scope);
    if !store.path().exists() {
        store.save(&Registry::default())?;
    }
    info!(scope = %scope, root = %paths.install_dir(scope).display(), "scope initialised");
    Ok(paths.install_dir(scope).to_path_buf())
}

/// Installed packages of one scope, or of both (global first) when `scope`
/// is `None`, optionally narrowed to one content type.
pub fn get_installed_packages(
    paths: &ClaudePaths,
    scope: Option<Scope>,
    content_type: Option<ContentType>,
) -> Result<Vec<InstalledPackage>> {
    let scopes = match scope {
        Some(scope) => vec![scope],
        None => Scope::BOTH.to_vec(),
    };
    let mut packages = Vec::new();
    for scope in scopes {
        let registry = RegistryStore::for_scope(paths, scope).load()?;
        packages.extend(registry.packages.into_iter().filter(|p| {
            p.scope == scope && content_type.is_none_or(|t| p.content_type == t)
        }));
    }
    Ok(packages)
}
