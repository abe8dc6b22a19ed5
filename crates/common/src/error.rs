use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Login, refresh or an expired session. The user has to log in again.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Local or server-reported throttling. Never retried automatically.
    #[error("{message}")]
    RateLimit {
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("network error: {0}")]
    Network(String),

    /// Hash mismatch or structure/content-scan violations.
    #[error("package verification failed: {}", .errors.join("; "))]
    Verification { errors: Vec<String> },

    #[error("not found: {0}")]
    NotFound(String),

    /// The OS credential facility is unavailable or refused the operation.
    #[error("credential storage error: {message}\nhint: {}", storage_hint())]
    Storage { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Message(String),

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    #[must_use]
    pub fn network(message: impl std::fmt::Display) -> Self {
        Self::Network(message.to_string())
    }

    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    #[must_use]
    pub fn storage(message: impl std::fmt::Display) -> Self {
        Self::Storage {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn rate_limited(message: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        Self::RateLimit {
            message: message.into(),
            retry_after_secs,
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether a batch of installs should stop after this error.
    ///
    /// Only a missing or dead session qualifies: every later package would
    /// fail the same way.
    #[must_use]
    pub fn is_fatal_for_batch(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

fn storage_hint() -> &'static str {
    if cfg!(target_os = "macos") {
        "make sure the login Keychain is unlocked and accessible"
    } else if cfg!(target_os = "windows") {
        "check that Windows Credential Manager is available for this user"
    } else {
        "no usable kernel keyring or secret service was found; set `credential_store = \"file\"` in claude-skills.toml to store the token in a 0600 file instead"
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Adds `.context()` and `.with_context()` to `Result` and `Option`.
pub trait Context<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        let ctx = context.into();
        self.map_err(|source| Error::Message(format!("{ctx}: {source}")))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|source| Error::Message(format!("{}: {source}", f().into())))
    }
}

impl<T> Context<T> for Option<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| Error::Message(context.into()))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.ok_or_else(|| Error::Message(f().into()))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_error_lists_every_violation() {
        let err = Error::Verification {
            errors: vec!["Missing required file: SKILL.md".into(), "File too large: x".into()],
        };
        let text = err.to_string();
        assert!(text.contains("SKILL.md"));
        assert!(text.contains("File too large"));
    }

    #[test]
    fn only_auth_errors_stop_a_batch() {
        assert!(Error::auth("expired").is_fatal_for_batch());
        assert!(!Error::not_found("demo").is_fatal_for_batch());
        assert!(!Error::rate_limited("slow down", Some(5)).is_fatal_for_batch());
    }

    #[test]
    fn storage_error_carries_remediation_hint() {
        let text = Error::storage("denied").to_string();
        assert!(text.contains("denied"));
        assert!(text.contains("hint:"));
    }

    #[test]
    fn context_wraps_result_and_option() {
        let res: std::result::Result<(), &str> = Err("boom");
        let err = res.context("reading registry").unwrap_err();
        assert_eq!(err.to_string(), "reading registry: boom");

        let none: Option<u8> = None;
        let err = none.with_context(|| "missing value").unwrap_err();
        assert_eq!(err.to_string(), "missing value");
    }
}
