//! Verification, installation and bookkeeping of marketplace packages.
//!
//! Layout per scope root:
//! - `{type}s/<name>/`: extracted package with an `.install-metadata.json` sidecar
//! - `registry.json`: installed packages
//! - `version-history.json`: versions seen per package
//! - `settings.json`: the host application's settings, edited on registration

pub mod deps;
pub mod effects;
pub mod history;
pub mod install;
pub mod pipeline;
pub mod registration;
pub mod registry;
mod store;
pub mod verify;

pub use {
    deps::{Dependency, PackageManifest, read_package_manifest, resolve_dependencies},
    effects::NonCritical,
    history::{PackageHistory, VersionHistory, VersionInfo},
    install::{
        InstallMetadata, InstallTarget, METADATA_FILE, extract_zip, install_package,
        read_install_metadata, validate_package,
    },
    pipeline::{DependencyFailure, InstallOptions, InstallPipeline, InstallReport},
    registration::{Registrar, SettingsRegistrar, merge_settings},
    registry::{
        InstalledPackage, Registry, RegistryStore, add_to_registry, get_installed_packages, init_scope,
        remove_from_registry,
    },
    verify::{
        VerificationResult, scan_for_malicious_content, sha256_file, validate_structure,
        verify_hash, verify_package,
    },
};
