use std::sync::Arc;

use {
    anyhow::{Result, bail},
    claude_skills_api::SearchOptions,
    claude_skills_common::{ContentType, Error, Scope},
    claude_skills_packages::{
        InstallOptions, InstallPipeline, InstallReport, InstalledPackage, SettingsRegistrar,
        VersionHistory, get_installed_packages, init_scope, remove_from_registry,
    },
};

use crate::app::App;

pub async fn install(
    app: &App,
    packages: &[String],
    scope: Scope,
    content_type: ContentType,
    version: Option<String>,
    skip_dependencies: bool,
) -> Result<()> {
    let pipeline = pipeline(app)?;
    let options = InstallOptions {
        scope,
        content_type,
        version,
        skip_dependencies,
    };

    let reports = pipeline.install_all(packages, &options).await;
    for report in &reports {
        print_report(report);
    }

    let failed = reports.iter().filter(|r| !r.is_success()).count();
    let skipped = packages.len() - reports.len();
    if failed + skipped > 0 {
        bail!(
            "{} of {} packages were not installed",
            failed + skipped,
            packages.len()
        );
    }
    Ok(())
}

fn pipeline(app: &App) -> Result<InstallPipeline> {
    let client = app.client()?;
    let registrar = Arc::new(SettingsRegistrar::new(app.paths.clone()));
    Ok(InstallPipeline::new(client, app.paths.clone(), registrar).with_audit_log(app.audit.clone()))
}

/// Registry entries to reinstall. Named packages must already be installed.
fn update_targets(
    installed: &[InstalledPackage],
    packages: &[String],
    all: bool,
) -> Result<Vec<(String, ContentType)>> {
    if all {
        return Ok(installed
            .iter()
            .map(|p| (p.name.clone(), p.content_type))
            .collect());
    }
    if packages.is_empty() {
        bail!(
            "specify packages to update or use --all\n  claude-skills update <package>\n  claude-skills update --all"
        );
    }
    let mut targets = Vec::new();
    let mut missing = Vec::new();
    for wanted in packages {
        let before = targets.len();
        targets.extend(
            installed
                .iter()
                .filter(|p| &p.name == wanted)
                .map(|p| (p.name.clone(), p.content_type)),
        );
        if targets.len() == before {
            missing.push(wanted.as_str());
        }
    }
    if !missing.is_empty() {
        bail!(
            "not installed: {}. Use `claude-skills install` for new packages",
            missing.join(", ")
        );
    }
    Ok(targets)
}

/// Reinstall the latest version of installed packages, one at a time.
pub async fn update(
    app: &App,
    packages: &[String],
    scope: Scope,
    content_type: Option<ContentType>,
    all: bool,
) -> Result<()> {
    let installed = get_installed_packages(&app.paths, Some(scope), content_type)?;
    let targets = update_targets(&installed, packages, all)?;
    if targets.is_empty() {
        println!("No packages installed.");
        return Ok(());
    }
    println!("Updating {} packages...", targets.len());

    let pipeline = pipeline(app)?;
    let mut failed = 0;
    let mut attempted = 0;
    for (name, content_type) in &targets {
        let options = InstallOptions {
            scope,
            content_type: *content_type,
            version: None,
            skip_dependencies: false,
        };
        let report = pipeline.install_tree(name, &options).await;
        attempted += 1;
        print_report(&report);
        if !report.is_success() {
            failed += 1;
            if report.error.as_ref().is_some_and(Error::is_fatal_for_batch) {
                break;
            }
        }
    }

    let not_updated = failed + targets.len() - attempted;
    if not_updated > 0 {
        bail!("{not_updated} of {} packages were not updated", targets.len());
    }
    Ok(())
}

pub fn init(app: &App, scope: Scope) -> Result<()> {
    let root = init_scope(&app.paths, scope)?;
    println!("Initialized {scope} scope at {}", root.display());
    println!("Next: claude-skills search <query>, then claude-skills install <package>");
    Ok(())
}

fn print_report(report: &InstallReport) {
    for (i, pkg) in report.installed.iter().enumerate() {
        let role = if i == 0 { "Installed" } else { "  + dependency" };
        println!(
            "{role} {} '{}' {} ({}) -> {}",
            pkg.content_type,
            pkg.name,
            pkg.version,
            pkg.scope,
            pkg.path.display()
        );
    }
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
    for failure in &report.dependency_failures {
        eprintln!(
            "  dependency {} '{}' of {} failed: {}",
            failure.content_type, failure.name, failure.required_by, failure.error
        );
    }
    if let Some(e) = &report.error {
        eprintln!("Failed to install '{}': {e}", report.requested);
    }
}

/// Exact name match first, then substring. Ambiguity is an error.
fn select_for_removal<'a>(
    installed: &'a [InstalledPackage],
    wanted: &str,
) -> Result<&'a InstalledPackage> {
    let exact: Vec<_> = installed.iter().filter(|p| p.name == wanted).collect();
    let candidates = if exact.is_empty() {
        installed
            .iter()
            .filter(|p| p.name.contains(wanted))
            .collect()
    } else {
        exact
    };
    match candidates.as_slice() {
        [] => bail!("package '{wanted}' is not installed"),
        [one] => Ok(one),
        many => {
            let list: Vec<String> = many
                .iter()
                .map(|p| format!("{} ({}, {})", p.name, p.content_type, p.scope))
                .collect();
            bail!(
                "'{wanted}' matches several packages: {}. Narrow it down with --type, --global or --local",
                list.join(", ")
            )
        },
    }
}

pub fn uninstall(
    app: &App,
    package: &str,
    scope: Option<Scope>,
    content_type: Option<ContentType>,
) -> Result<()> {
    let installed = get_installed_packages(&app.paths, scope, content_type)?;
    let target = select_for_removal(&installed, package)?;

    if target.path.exists() {
        std::fs::remove_dir_all(&target.path)?;
    }
    remove_from_registry(&app.paths, &target.name, target.content_type, target.scope)?;
    println!(
        "Uninstalled {} '{}' ({})",
        target.content_type, target.name, target.scope
    );
    Ok(())
}

pub fn list(
    app: &App,
    scope: Option<Scope>,
    content_type: Option<ContentType>,
    json: bool,
) -> Result<()> {
    let installed = get_installed_packages(&app.paths, scope, content_type)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&installed)?);
        return Ok(());
    }
    if installed.is_empty() {
        println!("No packages installed.");
        return Ok(());
    }
    let width = installed.iter().map(|p| p.name.len()).max().unwrap_or(0);
    for pkg in &installed {
        println!(
            "  {:<width$}  {:<8}  {:<10}  {}",
            pkg.name, pkg.content_type, pkg.version, pkg.scope
        );
    }
    Ok(())
}

pub async fn search(
    app: &App,
    query: &str,
    content_type: Option<ContentType>,
    category: Option<String>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let client = app.client()?;
    let options = SearchOptions {
        content_type,
        category,
        limit: Some(limit),
        offset: None,
    };
    let result = client.search(query, &options).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    if result.items.is_empty() {
        println!("No results for '{query}'.");
        return Ok(());
    }
    for item in &result.items {
        let version = item.version.as_deref().unwrap_or("latest");
        println!(
            "  {} [{}] {}  ({} downloads)",
            item.install_name(),
            item.content_type,
            version,
            item.downloads
        );
        if !item.description.is_empty() {
            println!("      {}", item.description);
        }
    }
    println!("{} of {} results", result.items.len(), result.total);
    Ok(())
}

pub fn audit(app: &App, limit: usize) -> Result<()> {
    let entries = app.audit.read_recent(limit);
    if entries.is_empty() {
        println!("Audit log is empty ({}).", app.audit.path().display());
        return Ok(());
    }
    for entry in entries {
        let status = if entry.success { "ok" } else { "FAILED" };
        let subject = match (&entry.package_type, &entry.package_id) {
            (Some(t), Some(id)) => format!(" {t} {id}"),
            (None, Some(id)) => format!(" {id}"),
            _ => String::new(),
        };
        let error = entry
            .error
            .map(|e| format!(": {e}"))
            .unwrap_or_default();
        println!(
            "{} {}{subject} {status}{error}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.operation
        );
    }
    Ok(())
}

pub fn rollback_versions(
    app: &App,
    package: &str,
    content_type: ContentType,
    scope: Scope,
) -> Result<()> {
    let versions = VersionHistory::for_scope(&app.paths, scope).rollback_versions(package, content_type)?;
    if versions.is_empty() {
        println!("No earlier versions of {content_type} '{package}' recorded in {scope} scope.");
        return Ok(());
    }
    for v in versions {
        let breaking = if v.breaking_changes { " (breaking)" } else { "" };
        println!(
            "  {}{breaking}  installed {}",
            v.version,
            v.installed_at.format("%Y-%m-%d")
        );
    }
    println!(
        "Reinstall one with: claude-skills install {package} -t {content_type} --version <VERSION>"
    );
    Ok(())
}
