//! Download, verify, install and record packages together with their
//! dependencies.
//!
//! Dependencies are processed from an explicit stack instead of recursion.
//! A visited set keyed by (name, type) makes dependency cycles terminate.

use std::{collections::HashSet, io::Write, sync::Arc};

use {
    chrono::Utc,
    claude_skills_api::{ContentItem, PackageSource, SearchOptions},
    claude_skills_common::{AuditEntry, AuditLog, ContentType, Error, Result, Scope},
    claude_skills_config::ClaudePaths,
    serde::Serialize,
    tracing::{debug, error, info, warn},
};

use crate::{
    deps::{read_package_manifest, resolve_dependencies},
    effects::NonCritical,
    history::VersionHistory,
    install::{InstallTarget, install_package},
    registration::Registrar,
    registry::{InstalledPackage, add_to_registry, get_installed_packages},
    verify::verify_package,
};

/// How many search hits are considered when resolving a name.
const SEARCH_LIMIT: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    pub scope: Scope,
    pub content_type: ContentType,
    pub version: Option<String>,
    pub skip_dependencies: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyFailure {
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub required_by: String,
    pub error: String,
}

/// Outcome of installing one requested package and its dependency tree.
#[derive(Debug)]
pub struct InstallReport {
    pub requested: String,
    /// Root first, then dependencies in install order.
    pub installed: Vec<InstalledPackage>,
    pub warnings: Vec<String>,
    pub dependency_failures: Vec<DependencyFailure>,
    /// Set when the requested package itself failed.
    pub error: Option<Error>,
}

impl InstallReport {
    fn new(requested: &str) -> Self {
        Self {
            requested: requested.to_owned(),
            installed: Vec::new(),
            warnings: Vec::new(),
            dependency_failures: Vec::new(),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
struct WorkItem {
    name: String,
    content_type: ContentType,
    version: Option<String>,
    optional: bool,
    required_by: Option<String>,
}

pub struct InstallPipeline {
    source: Arc<dyn PackageSource>,
    paths: ClaudePaths,
    registrar: Arc<dyn Registrar>,
    audit: Option<AuditLog>,
}

impl InstallPipeline {
    pub fn new(
        source: Arc<dyn PackageSource>,
        paths: ClaudePaths,
        registrar: Arc<dyn Registrar>,
    ) -> Self {
        Self {
            source,
            paths,
            registrar,
            audit: None,
        }
    }

    #[must_use]
    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    fn audit(&self, entry: AuditEntry) {
        if let Some(log) = &self.audit {
            log.record(&entry);
        }
    }

    /// Install each requested package in order, one tree at a time.
    ///
    /// A failed package does not stop the batch, except for an
    /// authentication failure, which every later package would hit too.
    pub async fn install_all(&self, names: &[String], options: &InstallOptions) -> Vec<InstallReport> {
        let mut reports = Vec::with_capacity(names.len());
        for name in names {
            let report = self.install_tree(name, options).await;
            let fatal = report
                .error
                .as_ref()
                .is_some_and(Error::is_fatal_for_batch);
            reports.push(report);
            if fatal {
                warn!("stopping batch after authentication failure");
                break;
            }
        }
        reports
    }

    /// Install `name` and, unless skipped, every missing dependency below it.
    pub async fn install_tree(&self, name: &str, options: &InstallOptions) -> InstallReport {
        let mut report = InstallReport::new(name);
        let mut visited: HashSet<(String, ContentType)> = HashSet::new();
        let mut stack = vec![WorkItem {
            name: name.to_owned(),
            content_type: options.content_type,
            version: options.version.clone(),
            optional: false,
            required_by: None,
        }];

        while let Some(item) = stack.pop() {
            if !visited.insert((item.name.clone(), item.content_type)) {
                debug!(package = %item.name, content_type = %item.content_type, "already handled in this tree");
                continue;
            }

            let mut effects = NonCritical::new();
            let outcome = self.install_one(&item, options.scope, &mut effects).await;
            report.warnings.extend(effects.into_warnings());

            match outcome {
                Ok(installed) => {
                    visited.insert((installed.name.clone(), installed.content_type));
                    if !options.skip_dependencies {
                        let deps = self.missing_dependencies(&installed, &mut report.warnings);
                        // Reversed so the first declared dependency is installed first.
                        stack.extend(deps.into_iter().rev());
                    }
                    report.installed.push(installed);
                },
                Err(e) => match item.required_by {
                    None => {
                        error!(package = %item.name, error = %e, "install failed");
                        report.error = Some(e);
                        break;
                    },
                    Some(parent) => {
                        let fatal = e.is_fatal_for_batch();
                        if item.optional {
                            let message = format!(
                                "optional dependency {} ({}) of {parent} was not installed: {e}",
                                item.name, item.content_type
                            );
                            warn!("{message}");
                            report.warnings.push(message);
                        } else {
                            error!(package = %item.name, required_by = %parent, error = %e, "dependency install failed");
                            report.dependency_failures.push(DependencyFailure {
                                name: item.name,
                                content_type: item.content_type,
                                required_by: parent,
                                error: e.to_string(),
                            });
                        }
                        if fatal {
                            break;
                        }
                    },
                },
            }
        }
        report
    }

    /// Dependencies declared by an installed package that the registry of the
    /// same scope does not satisfy yet.
    fn missing_dependencies(&self, installed: &InstalledPackage, warnings: &mut Vec<String>) -> Vec<WorkItem> {
        let Some(manifest) = read_package_manifest(&installed.path) else {
            return Vec::new();
        };
        let present = match get_installed_packages(&self.paths, Some(installed.scope), None) {
            Ok(present) => present,
            Err(e) => {
                let message = format!("could not read registry to resolve dependencies of {}: {e}", installed.name);
                warn!("{message}");
                warnings.push(message);
                return Vec::new();
            },
        };
        let missing = resolve_dependencies(&manifest, &present);
        if !missing.is_empty() {
            info!(package = %installed.name, count = missing.len(), "installing dependencies");
        }
        missing
            .into_iter()
            .map(|dep| WorkItem {
                name: dep.name,
                content_type: dep.content_type,
                version: dep.version,
                optional: dep.optional,
                required_by: Some(installed.name.clone()),
            })
            .collect()
    }

    async fn install_one(
        &self,
        item: &WorkItem,
        scope: Scope,
        effects: &mut NonCritical,
    ) -> Result<InstalledPackage> {
        match self.fetch_and_install(item, scope, effects).await {
            Ok((listing, installed)) => {
                self.audit(
                    AuditEntry::package("install", &listing.id, item.content_type, None)
                        .with_metadata(serde_json::json!({
                            "name": installed.name,
                            "version": installed.version,
                            "scope": scope,
                        })),
                );
                Ok(installed)
            },
            Err(e) => {
                let mut entry =
                    AuditEntry::package("install", &item.name, item.content_type, Some(e.to_string()));
                if let Error::Verification { errors } = &e {
                    entry = entry.with_metadata(serde_json::json!({ "errors": errors }));
                }
                self.audit(entry);
                Err(e)
            },
        }
    }

    /// A requested package may resolve to the best search hit. A dependency
    /// must match its declared name exactly.
    async fn resolve_listing(&self, item: &WorkItem) -> Result<ContentItem> {
        let options = SearchOptions {
            content_type: Some(item.content_type),
            limit: Some(SEARCH_LIMIT),
            ..Default::default()
        };
        let results = self.source.search(&item.name, &options).await?;
        let mut items = results.items.into_iter();
        let first = items.next();
        let exact = first
            .as_ref()
            .filter(|hit| hit.matches_name(&item.name))
            .cloned()
            .or_else(|| items.find(|hit| hit.matches_name(&item.name)));
        let hit = match &item.required_by {
            None => exact.or(first),
            Some(parent) => {
                if exact.is_none()
                    && let Some(other) = &first
                {
                    debug!(
                        package = %item.name,
                        required_by = %parent,
                        closest = %other.install_name(),
                        "no exact match for dependency"
                    );
                }
                exact
            },
        };
        hit.ok_or_else(|| {
            Error::not_found(format!(
                "{} '{}'. Try `claude-skills search {}` to see what is available",
                item.content_type, item.name, item.name
            ))
        })
    }

    async fn fetch_and_install(
        &self,
        item: &WorkItem,
        scope: Scope,
        effects: &mut NonCritical,
    ) -> Result<(ContentItem, InstalledPackage)> {
        let listing = self.resolve_listing(item).await?;
        // Dependencies keep their declared name so the registry satisfies them.
        let name = match item.required_by {
            Some(_) => item.name.clone(),
            None => listing.install_name().to_owned(),
        };
        info!(package = %name, id = %listing.id, content_type = %item.content_type, "downloading");

        let info = self
            .source
            .download_info(item.content_type, &listing.id, item.version.as_deref())
            .await?;
        if let Some(wanted) = item.version.as_deref()
            && info.version != wanted
        {
            return Err(Error::not_found(format!(
                "{} '{}' version {wanted} (marketplace offered {})",
                item.content_type, name, info.version
            )));
        }
        let bytes = self.source.fetch_archive(&info.url).await?;
        self.audit(
            AuditEntry::package("download", &listing.id, item.content_type, None).with_metadata(
                serde_json::json!({ "version": info.version, "size": bytes.len() }),
            ),
        );

        let mut archive = tempfile::Builder::new()
            .prefix("claude-pkg-")
            .suffix(".zip")
            .tempfile()?;
        archive.write_all(&bytes)?;
        archive.flush()?;

        let target = InstallTarget {
            scope,
            content_type: item.content_type,
            version: Some(info.version.clone()),
        };
        let paths = self.paths.clone();
        let registrar = Arc::clone(&self.registrar);
        let expected = info.integrity_hash.clone();
        let blocking_name = name.clone();

        // The archive temp file is dropped, and removed, inside the task.
        let (dir, install_effects) = tokio::task::spawn_blocking(move || {
            verify_package(
                archive.path(),
                None,
                target.content_type,
                expected.as_deref(),
            )?
            .into_result()?;
            let mut effects = NonCritical::new();
            let dir = install_package(
                archive.path(),
                &blocking_name,
                &target,
                &paths,
                registrar.as_ref(),
                &mut effects,
            )?;
            Ok::<_, Error>((dir, effects))
        })
        .await
        .map_err(|e| Error::external("install task failed", e))??;
        effects.merge(install_effects);

        let installed = InstalledPackage {
            name: name.clone(),
            content_type: item.content_type,
            version: info.version.clone(),
            installed_at: Utc::now(),
            path: dir,
            scope,
        };
        add_to_registry(&self.paths, installed.clone())?;
        effects.run(
            "version history",
            VersionHistory::for_scope(&self.paths, scope).record_installation(
                &listing.id,
                &name,
                item.content_type,
                &info.version,
                None,
            ),
        );

        Ok((listing, installed))
    }
}
