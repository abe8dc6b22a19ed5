use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::schema::MarketplaceConfig;

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["claude-skills.toml", "claude-skills.json"];

/// Load config from the given path (TOML or JSON by extension).
pub fn load_config(path: &Path) -> anyhow::Result<MarketplaceConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./claude-skills.{toml,json}` (project-local)
/// 2. `<user config dir>/claude-skills.{toml,json}` (user-global)
///
/// Returns `MarketplaceConfig::default()` if no config file is found or the
/// one found cannot be parsed.
pub fn discover_and_load() -> MarketplaceConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    MarketplaceConfig::default()
}

/// Apply environment overrides using a caller-supplied lookup.
///
/// `CLAUDE_SKILLS_API_URL` wins over `SUPABASE_URL` for the API base URL;
/// `AY_CLAUDE_CLIENT_ID` replaces the OAuth client id. Taking the lookup as a
/// closure keeps this testable without touching the process environment.
pub fn apply_env_overrides(
    config: &mut MarketplaceConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(url) = non_empty("CLAUDE_SKILLS_API_URL").or_else(|| non_empty("SUPABASE_URL")) {
        debug!(%url, "api_url overridden from environment");
        config.api_url = url;
    }
    if let Some(client_id) = non_empty("AY_CLAUDE_CLIENT_ID") {
        config.client_id = client_id;
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/claude-skills/` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "claude-skills").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<MarketplaceConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
