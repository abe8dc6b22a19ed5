use std::{path::Path, sync::Arc};

use {
    anyhow::Context,
    claude_skills_api::MarketplaceClient,
    claude_skills_common::AuditLog,
    claude_skills_config::{ClaudePaths, CredentialBackend, MarketplaceConfig},
    claude_skills_oauth::{Authenticator, CredentialStore, FileCredentialStore, KeyringCredentialStore},
    tracing::debug,
};

/// Everything a command needs, built once from config, environment and flags.
pub struct App {
    pub config: Arc<MarketplaceConfig>,
    pub paths: ClaudePaths,
    pub audit: AuditLog,
}

impl App {
    /// Precedence: `--api-url`, then environment, then config file, then defaults.
    pub fn load(config_path: Option<&Path>, api_url: Option<&str>) -> anyhow::Result<Self> {
        let mut config = match config_path {
            Some(path) => claude_skills_config::load_config(path)?,
            None => claude_skills_config::discover_and_load(),
        };
        claude_skills_config::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        if let Some(url) = api_url {
            config.api_url = url.to_owned();
        }
        debug!(api_url = %config.api_url, "configuration loaded");

        let paths = ClaudePaths::discover()?;
        let audit = AuditLog::new(paths.audit_log_path());
        Ok(Self {
            config: Arc::new(config),
            paths,
            audit,
        })
    }

    pub fn credential_store(&self) -> anyhow::Result<Arc<dyn CredentialStore>> {
        Ok(match self.config.credential_store {
            CredentialBackend::Keyring => Arc::new(KeyringCredentialStore::new()),
            CredentialBackend::File => {
                let path = FileCredentialStore::default_path()
                    .context("could not determine the config directory for credentials.json")?;
                Arc::new(FileCredentialStore::with_path(path))
            },
        })
    }

    pub fn authenticator(&self) -> anyhow::Result<Arc<Authenticator>> {
        let auth = Authenticator::new(Arc::clone(&self.config), self.credential_store()?)?
            .with_audit_log(self.audit.clone());
        Ok(Arc::new(auth))
    }

    pub fn client(&self) -> anyhow::Result<Arc<MarketplaceClient>> {
        let client = MarketplaceClient::new(Arc::clone(&self.config), self.authenticator()?)?;
        Ok(Arc::new(client))
    }
}
