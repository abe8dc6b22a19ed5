//! Persistence for the OAuth [`Token`] bundle.
//!
//! The store is an injected capability: the CLI picks a backend from config
//! and tests substitute [`MemoryCredentialStore`].

use std::{path::PathBuf, sync::Mutex};

use {
    claude_skills_common::{Error, Result},
    tracing::{debug, info, warn},
};

use crate::types::Token;

/// Fixed service name under which the token lives in the OS secret store.
pub const KEYRING_SERVICE: &str = "claude-skills-cli";
/// Fixed account name paired with [`KEYRING_SERVICE`].
pub const KEYRING_ACCOUNT: &str = "claude-skills-token";

pub trait CredentialStore: Send + Sync {
    /// Persist the token, replacing any previous one.
    fn store(&self, token: &Token) -> Result<()>;

    /// Read the token back. Absent or unparsable data yields `None`.
    fn get(&self) -> Option<Token>;

    /// Remove the token. Removing nothing is not an error.
    fn delete(&self) -> Result<()>;

    /// A token is present and does not expire within the safety buffer.
    fn is_valid(&self) -> bool {
        self.get().is_some_and(|t| t.is_valid())
    }
}

fn encode(token: &Token) -> Result<String> {
    Ok(serde_json::to_string(token)?)
}

fn decode(raw: &str, backend: &str) -> Option<Token> {
    match serde_json::from_str::<Token>(raw) {
        Ok(token) if token.access_token().is_empty() => {
            warn!(backend, "stored token has an empty access token, ignoring it");
            None
        },
        Ok(token) => Some(token),
        Err(e) => {
            warn!(backend, error = %e, "stored token is corrupt, ignoring it");
            None
        },
    }
}

// ── OS keychain ─────────────────────────────────────────────────────────────

/// OS secret store: Keychain, Credential Manager, or the Linux kernel keyring.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
    account: String,
}

impl KeyringCredentialStore {
    pub fn new() -> Self {
        Self::with_names(KEYRING_SERVICE, KEYRING_ACCOUNT)
    }

    pub fn with_names(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.account).map_err(Error::storage)
    }
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn store(&self, token: &Token) -> Result<()> {
        let data = encode(token)?;
        self.entry()?
            .set_password(&data)
            .map_err(|e| Error::storage(format!("failed to store token: {e}")))?;
        info!(service = %self.service, "token saved to OS keychain");
        Ok(())
    }

    fn get(&self) -> Option<Token> {
        let entry = match self.entry() {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "OS keychain unavailable");
                return None;
            },
        };
        match entry.get_password() {
            Ok(raw) => decode(&raw, "keyring"),
            Err(keyring::Error::NoEntry) => {
                debug!(service = %self.service, "no token in OS keychain");
                None
            },
            Err(e) => {
                warn!(service = %self.service, error = %e, "token read from OS keychain failed");
                None
            },
        }
    }

    fn delete(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::storage(format!("failed to delete token: {e}"))),
        }
    }
}

// ── Plain file ──────────────────────────────────────────────────────────────

/// File-based token storage for hosts without a usable secret service.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    /// `<user config dir>/credentials.json`.
    pub fn default_path() -> Option<PathBuf> {
        claude_skills_config::config_dir().map(|dir| dir.join("credentials.json"))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn store(&self, token: &Token) -> Result<()> {
        let path = self.path.display().to_string();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::storage)?;
        }

        let data = encode(token)?;
        std::fs::write(&self.path, data).map_err(Error::storage)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .map_err(Error::storage)?;
        }

        info!(path = %path, "token saved");
        Ok(())
    }

    fn get(&self) -> Option<Token> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => decode(&raw, "file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "token file not found");
                None
            },
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "token file read failed");
                None
            },
        }
    }

    fn delete(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(e)),
        }
    }
}

// ── In-memory ───────────────────────────────────────────────────────────────

/// Keeps the serialized token in memory. Holds the same JSON the real
/// backends hold, so corrupt-data handling can be exercised too.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    raw: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &Token) -> Result<Self> {
        Ok(Self::with_raw(encode(token)?))
    }

    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            raw: Mutex::new(Some(raw.into())),
        }
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.raw.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn store(&self, token: &Token) -> Result<()> {
        *self.slot() = Some(encode(token)?);
        Ok(())
    }

    fn get(&self) -> Option<Token> {
        self.slot().as_deref().and_then(|raw| decode(raw, "memory"))
    }

    fn delete(&self) -> Result<()> {
        *self.slot() = None;
        Ok(())
    }
}
