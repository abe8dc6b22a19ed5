//! HMAC request signatures.

use {
    claude_skills_common::{Error, Result},
    hmac::{Hmac, Mac},
    sha2::Sha256,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Request-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Request-Timestamp";

/// Number of leading access-token characters used as the HMAC key.
const SECRET_CHARS: usize = 32;

/// Hex HMAC-SHA256 over `METHOD + path + timestamp + body`, keyed with the
/// first 32 characters of the access token.
pub fn sign_request(
    method: &str,
    path: &str,
    timestamp: &str,
    body: &str,
    access_token: &str,
) -> Result<String> {
    let secret: String = access_token.chars().take(SECRET_CHARS).collect();
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::message(format!("failed to create request signature: {e}")))?;
    mac.update(method.to_ascii_uppercase().as_bytes());
    mac.update(path.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
