//! Configuration loading and on-disk layout.
//!
//! Config files: `claude-skills.toml` or `claude-skills.json`,
//! searched in `./` then the user config directory.
//!
//! The resulting [`MarketplaceConfig`] is built once at process entry and
//! handed to every collaborator; nothing below `main` reads the environment.

pub mod loader;
pub mod paths;
pub mod schema;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    paths::ClaudePaths,
    schema::{CredentialBackend, MarketplaceConfig, RateLimitConfig},
};
