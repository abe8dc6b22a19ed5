//! Stable per-machine identifier sent with device-code requests.

use sha2::{Digest, Sha256};

/// The platform values the device id is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFingerprint {
    pub hostname: String,
    pub username: String,
    /// Numeric uid on Unix, profile directory elsewhere.
    pub secondary: String,
}

impl DeviceFingerprint {
    /// Collect the fingerprint of the running machine. Values that cannot be
    /// read become `"unknown"`, which still yields a deterministic id.
    pub fn current() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".into());
        let (username, secondary) = platform_identity();
        Self {
            hostname,
            username,
            secondary,
        }
    }

    /// First 16 hex chars of `sha256("{hostname}-{username}-{secondary}")`.
    pub fn device_id(&self) -> String {
        let digest = Sha256::digest(format!(
            "{}-{}-{}",
            self.hostname, self.username, self.secondary
        ));
        let mut id = hex::encode(digest);
        id.truncate(16);
        id
    }
}

#[cfg(unix)]
fn platform_identity() -> (String, String) {
    let uid = nix::unistd::getuid();
    let username = nix::unistd::User::from_uid(uid)
        .ok()
        .flatten()
        .map(|u| u.name)
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "unknown".into());
    (username, uid.as_raw().to_string())
}

#[cfg(not(unix))]
fn platform_identity() -> (String, String) {
    let username = std::env::var("USERNAME").unwrap_or_else(|_| "unknown".into());
    let profile = std::env::var("USERPROFILE").unwrap_or_else(|_| "unknown".into());
    (username, profile)
}
