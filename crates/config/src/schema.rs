//! Config schema for the marketplace client.

use serde::{Deserialize, Serialize};

/// Where the OAuth token bundle is persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    /// OS keychain / credential manager / kernel keyring.
    #[default]
    Keyring,
    /// `0600` JSON file in the user config directory.
    File,
}

/// Client-side request caps per endpoint category over a sliding window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub search: u32,
    pub download: u32,
    pub install: u32,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            search: 100,
            download: 50,
            install: 20,
            window_secs: 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    /// Base URL of the marketplace backend.
    pub api_url: String,
    /// OAuth client id sent with device-flow and refresh requests.
    pub client_id: String,
    /// Space-separated scopes requested at login.
    pub auth_scope: String,
    /// Prefix of the search and download functions, relative to `api_url`.
    pub functions_path: String,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub credential_store: CredentialBackend,
    pub rate_limits: RateLimitConfig,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            api_url: "https://your-project.supabase.co".into(),
            client_id: "ay-claude-cli".into(),
            auth_scope: "read:content read:download".into(),
            functions_path: "/functions/v1".into(),
            request_timeout_secs: 30,
            user_agent: concat!("claude-skills-cli/", env!("CARGO_PKG_VERSION")).into(),
            credential_store: CredentialBackend::default(),
            rate_limits: RateLimitConfig::default(),
        }
    }
}

impl MarketplaceConfig {
    /// `api_url` without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    /// Absolute URL of an auth endpoint such as `/api/v1/auth/token`.
    pub fn auth_url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url())
    }

    /// Path (not URL) of a marketplace function, e.g. `/functions/v1/search`.
    pub fn function_path(&self, name: &str) -> String {
        format!("{}/{name}", self.functions_path.trim_end_matches('/'))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: MarketplaceConfig = toml::from_str(
            r#"
api_url = "https://market.example.com/"

[rate_limits]
search = 5
"#,
        )
        .unwrap();
        assert_eq!(cfg.base_url(), "https://market.example.com");
        assert_eq!(cfg.rate_limits.search, 5);
        assert_eq!(cfg.rate_limits.download, 50);
        assert_eq!(cfg.client_id, "ay-claude-cli");
        assert_eq!(cfg.credential_store, CredentialBackend::Keyring);
    }

    #[test]
    fn urls_are_joined_without_double_slashes() {
        let cfg = MarketplaceConfig {
            api_url: "http://127.0.0.1:9000/".into(),
            functions_path: "/functions/v1/".into(),
            ..Default::default()
        };
        assert_eq!(
            cfg.auth_url("/api/v1/auth/token"),
            "http://127.0.0.1:9000/api/v1/auth/token"
        );
        assert_eq!(cfg.function_path("search"), "/functions/v1/search");
    }

    #[test]
    fn credential_backend_parses_lowercase() {
        let cfg: MarketplaceConfig = toml::from_str("credential_store = \"file\"").unwrap();
        assert_eq!(cfg.credential_store, CredentialBackend::File);
    }
}
