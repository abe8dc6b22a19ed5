use std::collections::BTreeSet;

use {
    chrono::{DateTime, Duration, Utc},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Tokens are treated as expired this many seconds before their real expiry,
/// so a token that passes the check does not die between the check and its use.
pub const EXPIRY_BUFFER_SECS: i64 = 5 * 60;

fn expiry_buffer() -> Duration {
    Duration::seconds(EXPIRY_BUFFER_SECS)
}

/// The persisted OAuth token bundle.
///
/// Serialized with camelCase keys and an RFC 3339 `expiresAt`, which is the
/// layout kept in the OS secret store.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    #[serde(serialize_with = "serialize_secret")]
    pub access_token: Secret<String>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<Secret<String>>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub device_id: String,
}

impl Token {
    pub fn access_token(&self) -> &str {
        self.access_token.expose_secret()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(|s| s.expose_secret().as_str())
    }

    /// Valid means `expires_at` lies beyond `now` plus [`EXPIRY_BUFFER_SECS`].
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token().is_empty() && self.expires_at > now + expiry_buffer()
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Time left before the buffered expiry, or `None` once it has passed.
    pub fn remaining(&self) -> Option<std::time::Duration> {
        (self.expires_at - expiry_buffer() - Utc::now()).to_std().ok()
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("user_id", &self.user_id)
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// Identity returned by `GET /api/v1/user/me`.
#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

fn deserialize_id<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number user id, got {other}"
        ))),
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

/// Serialize a `Secret<String>` by exposing its inner value.
/// Only for fields that must round-trip through the credential store.
pub fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

pub fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
