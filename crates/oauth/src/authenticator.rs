use std::{sync::Arc, time::Duration};

use {
    chrono::{DateTime, TimeDelta, Utc},
    claude_skills_common::{AuditEntry, AuditLog, Error, Result},
    claude_skills_config::MarketplaceConfig,
    secrecy::Secret,
    tracing::{info, warn},
};

use crate::{
    device_flow::{self, DeviceCodeResponse, TokenGrant},
    device_id::DeviceFingerprint,
    storage::CredentialStore,
    types::{Token, UserInfo},
};

pub const USER_INFO_PATH: &str = "/api/v1/user/me";

/// Longest token lifetime accepted from the server.
pub const MAX_TOKEN_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Message shown whenever the session cannot be recovered without a new login.
pub const RELOGIN_HINT: &str = "Authentication expired. Please run \"claude-skills login\" again.";

/// `now + expires_in`, with the lifetime capped at [`MAX_TOKEN_TTL_SECS`].
fn expiry_after(now: DateTime<Utc>, expires_in: u64) -> Result<DateTime<Utc>> {
    i64::try_from(expires_in.min(MAX_TOKEN_TTL_SECS))
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| Error::auth(format!("token endpoint returned an unusable expires_in ({expires_in})")))
}

/// Shows the user code to the human between requesting a device code and
/// polling for the token.
pub trait DevicePrompt: Send + Sync {
    fn present(&self, code: &DeviceCodeResponse);
}

/// Prompt that shows nothing. Useful for tests and non-interactive callers.
pub struct SilentPrompt;

impl DevicePrompt for SilentPrompt {
    fn present(&self, _code: &DeviceCodeResponse) {}
}

/// OAuth device-flow login, token refresh and session lookup.
pub struct Authenticator {
    config: Arc<MarketplaceConfig>,
    http: reqwest::Client,
    store: Arc<dyn CredentialStore>,
    device_id: String,
    audit: Option<AuditLog>,
}

impl Authenticator {
    pub fn new(config: Arc<MarketplaceConfig>, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(Error::network)?;
        Ok(Self {
            config,
            http,
            store,
            device_id: DeviceFingerprint::current().device_id(),
            audit: None,
        })
    }

    #[must_use]
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = device_id.into();
        self
    }

    #[must_use]
    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn config(&self) -> &MarketplaceConfig {
        &self.config
    }

    /// The stored token as-is, without validity checks or refresh.
    pub fn stored_token(&self) -> Option<Token> {
        self.store.get()
    }

    /// Run the device flow to completion and persist the resulting token.
    pub async fn login(&self, prompt: &dyn DevicePrompt) -> Result<Token> {
        let result = self.run_device_flow(prompt).await;
        self.audit(AuditEntry::auth(
            "login",
            result.as_ref().err().map(ToString::to_string),
        ));
        result
    }

    async fn run_device_flow(&self, prompt: &dyn DevicePrompt) -> Result<Token> {
        let code =
            device_flow::request_device_code(&self.http, &self.config, &self.device_id).await?;
        info!(
            user_code = %code.user_code,
            expires_in = code.expires_in,
            "device code issued"
        );
        prompt.present(&code);

        let grant = device_flow::poll_for_token(&self.http, &self.config, &code).await?;
        let token = self.complete(grant).await?;
        info!(user_id = %token.user_id, "logged in");
        Ok(token)
    }

    /// `GET /api/v1/user/me` with the given bearer token.
    pub async fn fetch_user_info(&self, access_token: &str) -> Result<UserInfo> {
        let resp = self
            .http
            .get(self.config.auth_url(USER_INFO_PATH))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(Error::network)?;
        if !resp.status().is_success() {
            return Err(Error::auth(format!(
                "identity lookup failed ({})",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| Error::auth(format!("identity lookup returned an invalid body: {e}")))
    }

    /// Attach identity to a fresh grant and persist it.
    async fn complete(&self, grant: TokenGrant) -> Result<Token> {
        let user = self.fetch_user_info(&grant.access_token).await?;
        let token = Token {
            expires_at: expiry_after(Utc::now(), grant.expires_in)?,
            access_token: Secret::new(grant.access_token),
            refresh_token: grant.refresh_token.map(Secret::new),
            scopes: grant.scopes,
            user_id: user.id,
            device_id: self.device_id.clone(),
        };
        self.store.store(&token)?;
        Ok(token)
    }

    /// Exchange `refresh_token` for a new token, re-fetch identity and persist.
    ///
    /// The old refresh token is kept when the server does not rotate it.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<Token> {
        let result = async {
            let mut grant =
                device_flow::refresh_grant(&self.http, &self.config, refresh_token).await?;
            if grant.refresh_token.is_none() {
                grant.refresh_token = Some(refresh_token.to_owned());
            }
            self.complete(grant).await
        }
        .await;
        self.audit(AuditEntry::auth(
            "refresh",
            result.as_ref().err().map(ToString::to_string),
        ));
        result
    }

    /// Refresh the stored token after the server rejected it.
    ///
    /// Fails with [`RELOGIN_HINT`] when there is no refresh token or the
    /// refresh itself fails.
    pub async fn refresh_stored(&self) -> Result<Token> {
        let refresh = self
            .store
            .get()
            .and_then(|t| t.refresh_token().map(str::to_owned))
            .ok_or_else(|| Error::auth(RELOGIN_HINT))?;
        self.refresh_token(&refresh).await.map_err(|e| {
            warn!(error = %e, "token refresh after 401 failed");
            Error::auth(RELOGIN_HINT)
        })
    }

    /// The stored token if valid, else one refresh attempt.
    ///
    /// A failed refresh, or an expired token with nothing to refresh it
    /// with, deletes the stored credential and yields `None`.
    pub async fn authenticated_token(&self) -> Option<Token> {
        let token = self.store.get()?;
        if token.is_valid() {
            return Some(token);
        }

        let refreshed = match token.refresh_token() {
            Some(refresh) => self.refresh_token(refresh).await,
            None => Err(Error::auth("token expired and no refresh token is stored")),
        };
        match refreshed {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, "stored session is no longer usable, clearing it");
                if let Err(e) = self.store.delete() {
                    warn!(error = %e, "failed to clear stored token");
                }
                None
            },
        }
    }

    /// Delete the stored credential.
    pub fn logout(&self) -> Result<()> {
        let result = self.store.delete();
        self.audit(AuditEntry::auth(
            "logout",
            result.as_ref().err().map(ToString::to_string),
        ));
        result
    }

    fn audit(&self, entry: AuditEntry) {
        if let Some(audit) = &self.audit {
            audit.record(&entry);
        }
    }
}
