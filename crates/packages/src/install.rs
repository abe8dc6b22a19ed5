use std::{
    fs::File,
    io,
    path::{Component, Path, PathBuf},
};

use {
    chrono::{DateTime, Utc},
    claude_skills_common::{ContentType, Context, Error, Result, Scope},
    claude_skills_config::ClaudePaths,
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
    zip::ZipArchive,
};

use crate::{effects::NonCritical, registration::Registrar};

/// Sidecar written into every installed package directory.
pub const METADATA_FILE: &str = ".install-metadata.json";

/// Scripts that get the executable bit after extraction.
#[cfg(unix)]
const SCRIPT_EXTENSIONS: &[&str] = &["sh", "py"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallMetadata {
    pub name: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub installed_at: DateTime<Utc>,
    pub version: String,
    pub scope: Scope,
}

/// Where and as what a package is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTarget {
    pub scope: Scope,
    pub content_type: ContentType,
    pub version: Option<String>,
}

/// Reject entry paths that would land outside the destination.
fn sanitize_archive_path(raw: &str) -> Result<Option<PathBuf>> {
    let path = Path::new(raw);
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::message(format!(
                    "archive contains unsafe path component: {raw}"
                )));
            },
        }
    }
    if clean.as_os_str().is_empty() {
        return Ok(None);
    }
    Ok(Some(clean))
}

/// Extract every entry of a zip archive into `dest`.
///
/// Any bad entry fails the whole extraction; callers discard `dest` in that
/// case.
pub fn extract_zip(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("failed to open archive {}", archive.display()))?;
    let mut zip = ZipArchive::new(file)
        .map_err(|e| Error::external(format!("invalid package archive {}", archive.display()), e))?;
    std::fs::create_dir_all(dest)?;

    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| Error::external("failed to read archive entry", e))?;
        let raw = entry.name().replace('\\', "/");
        if entry.is_symlink() {
            warn!(entry = %raw, "skipping symlink archive entry");
            continue;
        }
        let Some(relative) = sanitize_archive_path(&raw)? else {
            continue;
        };
        let out = dest.join(&relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out_file = File::create(&out)
            .with_context(|| format!("failed to create {}", out.display()))?;
        io::copy(&mut entry, &mut out_file)
            .with_context(|| format!("failed to extract {}", out.display()))?;
    }
    debug!(archive = %archive.display(), dest = %dest.display(), entries = zip.len(), "archive extracted");
    Ok(())
}

/// A package name becomes a directory name: exactly one normal component.
fn check_package_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(()),
        _ => Err(Error::message(format!("invalid package name: {name:?}"))),
    }
}

/// Extract `archive` into `<scope>/<type>s/<name>`, write the metadata
/// sidecar, mark scripts executable and register the package with the host.
///
/// An existing directory for the same package is replaced. Script
/// permissions and registration are non-critical: their failures land in
/// `effects`. Returns the install directory.
pub fn install_package(
    archive: &Path,
    name: &str,
    target: &InstallTarget,
    paths: &ClaudePaths,
    registrar: &dyn Registrar,
    effects: &mut NonCritical,
) -> Result<PathBuf> {
    check_package_name(name)?;
    let install_dir = paths.package_dir(target.scope, target.content_type, name);

    if install_dir.exists() {
        debug!(dir = %install_dir.display(), "replacing previous installation");
        std::fs::remove_dir_all(&install_dir)?;
    }
    if let Err(e) = extract_zip(archive, &install_dir) {
        let _ = std::fs::remove_dir_all(&install_dir);
        return Err(e);
    }

    let metadata = InstallMetadata {
        name: name.to_owned(),
        content_type: target.content_type,
        installed_at: Utc::now(),
        version: target
            .version
            .clone()
            .unwrap_or_else(|| "latest".to_owned()),
        scope: target.scope,
    };
    let sidecar = serde_json::to_string_pretty(&metadata)?;
    std::fs::write(install_dir.join(METADATA_FILE), sidecar)?;

    #[cfg(unix)]
    effects.run("script permissions", mark_scripts_executable(&install_dir));

    effects.run(
        "host registration",
        registrar.register(&install_dir, name, target.content_type, target.scope),
    );

    info!(
        package = name,
        content_type = %target.content_type,
        scope = %target.scope,
        dir = %install_dir.display(),
        "package installed"
    );
    Ok(install_dir)
}

#[cfg(unix)]
fn mark_scripts_executable(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    for entry in walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let is_script = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| SCRIPT_EXTENSIONS.contains(&ext));
        if is_script {
            let mut perms = entry.metadata().map_err(io::Error::from)?.permissions();
            perms.set_mode(perms.mode() | 0o755);
            std::fs::set_permissions(entry.path(), perms)?;
        }
    }
    Ok(())
}

/// Pre-flight check: every file the content type requires is present.
pub fn validate_package(package_dir: &Path, content_type: ContentType) -> bool {
    content_type
        .required_files()
        .iter()
        .all(|file| package_dir.join(file).is_file())
}

/// Read the sidecar of an installed package, if present and well-formed.
pub fn read_install_metadata(package_dir: &Path) -> Option<InstallMetadata> {
    let data = std::fs::read_to_string(package_dir.join(METADATA_FILE)).ok()?;
    serde_json::from_str(&data).ok()
}
