use std::{collections::BTreeSet, time::Duration};

use {
    claude_skills_common::{Error, Result},
    claude_skills_config::MarketplaceConfig,
    serde::{Deserialize, Serialize},
    tokio::time::Instant,
    tracing::{debug, info},
};

pub const DEVICE_CODE_PATH: &str = "/api/v1/auth/device-code";
pub const TOKEN_PATH: &str = "/api/v1/auth/token";

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;
/// RFC 8628 §3.5: clients must not poll faster than this.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Upper bound on a device code's lifetime, whatever the server claims.
const MAX_DEVICE_CODE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Response from the device code request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

fn default_expires_in() -> u64 {
    900
}

impl DeviceCodeResponse {
    /// The URI to show the user, preferring the one with the code embedded.
    pub fn browser_uri(&self) -> &str {
        self.verification_uri_complete
            .as_deref()
            .unwrap_or(&self.verification_uri)
    }
}

/// Tokens granted by the token endpoint, before identity is attached.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    pub scopes: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

impl TokenResponse {
    pub(crate) fn into_grant(self, requested_scope: &str) -> Option<TokenGrant> {
        let access_token = self.access_token.filter(|t| !t.is_empty())?;
        let scope = self.scope.as_deref().unwrap_or(requested_scope);
        Some(TokenGrant {
            access_token,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            expires_in: self.expires_in.unwrap_or(DEFAULT_TOKEN_TTL_SECS),
            scopes: scope.split_whitespace().map(str::to_owned).collect(),
        })
    }

    pub(crate) fn error_message(&self) -> String {
        match (&self.error, &self.error_description) {
            (Some(code), Some(desc)) => format!("{code}: {desc}"),
            (Some(code), None) => code.clone(),
            (None, Some(desc)) => desc.clone(),
            (None, None) => "unexpected response from token endpoint".into(),
        }
    }
}

/// What one poll of the token endpoint means for the login state machine.
#[derive(Debug)]
pub(crate) enum PollOutcome {
    Granted(TokenGrant),
    Pending,
    SlowDown,
    /// `expired_token` or `access_denied`: stop polling.
    Rejected(String),
    /// Anything else; polling continues.
    Transient(String),
}

pub(crate) fn classify(success: bool, body: TokenResponse, requested_scope: &str) -> PollOutcome {
    match body.error.as_deref() {
        Some("authorization_pending") => return PollOutcome::Pending,
        Some("slow_down") => return PollOutcome::SlowDown,
        Some(code @ ("expired_token" | "access_denied")) => {
            return PollOutcome::Rejected(code.to_owned());
        },
        _ => {},
    }
    if success {
        let message = body.error_message();
        if let Some(grant) = body.into_grant(requested_scope) {
            return PollOutcome::Granted(grant);
        }
        return PollOutcome::Transient(message);
    }
    PollOutcome::Transient(body.error_message())
}

/// Request a device code for this machine.
pub async fn request_device_code(
    client: &reqwest::Client,
    config: &MarketplaceConfig,
    device_id: &str,
) -> Result<DeviceCodeResponse> {
    let resp = client
        .post(config.auth_url(DEVICE_CODE_PATH))
        .header("Accept", "application/json")
        .json(&serde_json::json!({
            "client_id": config.client_id,
            "scope": config.auth_scope,
            "device_id": device_id,
        }))
        .send()
        .await
        .map_err(Error::network)?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::auth(format!(
            "device code request failed ({status}): {body}"
        )));
    }

    resp.json().await.map_err(Error::network)
}

async fn poll_once(
    client: &reqwest::Client,
    config: &MarketplaceConfig,
    device_code: &str,
) -> Result<PollOutcome> {
    let resp = client
        .post(config.auth_url(TOKEN_PATH))
        .header("Accept", "application/json")
        .json(&serde_json::json!({
            "grant_type": DEVICE_CODE_GRANT,
            "device_code": device_code,
            "client_id": config.client_id,
        }))
        .send()
        .await
        .map_err(Error::network)?;

    let success = resp.status().is_success();
    let body: TokenResponse = resp.json().await.map_err(Error::network)?;
    Ok(classify(success, body, &config.auth_scope))
}

/// Poll the token endpoint until the user completes the device flow.
///
/// Bounded by `code.expires_in`; `slow_down` doubles the wait for every
/// subsequent poll.
pub async fn poll_for_token(
    client: &reqwest::Client,
    config: &MarketplaceConfig,
    code: &DeviceCodeResponse,
) -> Result<TokenGrant> {
    let (budget, mut wait) = poll_schedule(code);
    let deadline = Instant::now() + budget;

    loop {
        let now = Instant::now();
        if now >= deadline {
            return Err(Error::auth(
                "device authorization timed out, run login again",
            ));
        }
        tokio::time::sleep(wait.min(deadline - now)).await;

        match poll_once(client, config, &code.device_code).await {
            Ok(PollOutcome::Granted(grant)) => {
                info!("device authorization granted");
                return Ok(grant);
            },
            Ok(PollOutcome::Pending) => {},
            Ok(PollOutcome::SlowDown) => {
                wait = wait.saturating_mul(2).min(budget);
                debug!(wait_secs = wait.as_secs(), "token endpoint asked to slow down");
            },
            Ok(PollOutcome::Rejected(reason)) => {
                return Err(Error::auth(format!("authorization {reason}")));
            },
            Ok(PollOutcome::Transient(reason)) => {
                debug!(%reason, "token poll failed, retrying");
            },
            Err(e) => {
                debug!(error = %e, "token poll request failed, retrying");
            },
        }
    }
}

/// Total polling budget and initial wait, clamped to sane bounds.
fn poll_schedule(code: &DeviceCodeResponse) -> (Duration, Duration) {
    let budget = Duration::from_secs(code.expires_in).min(MAX_DEVICE_CODE_TTL);
    let wait = Duration::from_secs(code.interval).clamp(MIN_POLL_INTERVAL, MAX_DEVICE_CODE_TTL);
    (budget, wait)
}

/// Exchange a refresh token for a new grant.
pub async fn refresh_grant(
    client: &reqwest::Client,
    config: &MarketplaceConfig,
    refresh_token: &str,
) -> Result<TokenGrant> {
    let resp = client
        .post(config.auth_url(TOKEN_PATH))
        .header("Accept", "application/json")
        .json(&serde_json::json!({
            "grant_type": "refresh_token",
            "refresh_token": refresh_token,
            "client_id": config.client_id,
        }))
        .send()
        .await
        .map_err(|e| Error::auth(format!("token refresh failed: {e}")))?;

    let status = resp.status();
    let body: TokenResponse = resp
        .json()
        .await
        .map_err(|e| Error::auth(format!("token refresh failed: {e}")))?;
    if !status.is_success() {
        return Err(Error::auth(format!(
            "token refresh failed ({status}): {}",
            body.error_message()
        )));
    }
    let message = body.error_message();
    body.into_grant(&config.auth_scope)
        .ok_or_else(|| Error::auth(format!("token refresh failed: {message}")))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use axum::{Json, Router, http::StatusCode, routing::post};

    fn test_config(base: &str) -> MarketplaceConfig {
        MarketplaceConfig {
            api_url: base.to_string(),
            client_id: "test-client".into(),
            ..Default::default()
        }
    }

    fn code(interval: u64, expires_in: u64) -> DeviceCodeResponse {
        DeviceCodeResponse {
            device_code: "dc_123".into(),
            user_code: "ABCD-1234".into(),
            verification_uri: "https://example.com/device".into(),
            verification_uri_complete: None,
            expires_in,
            interval,
        }
    }

    /// Start a mock HTTP server and return its base URL.
    async fn start_mock(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn body(json: serde_json::Value) -> TokenResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn device_code_response_defaults() {
        let resp: DeviceCodeResponse = serde_json::from_str(
            r#"{"device_code":"dc","user_code":"CODE","verification_uri":"https://example.com"}"#,
        )
        .unwrap();
        assert_eq!(resp.interval, 5);
        assert_eq!(resp.expires_in, 900);
        assert_eq!(resp.browser_uri(), "https://example.com");
    }

    #[test]
    fn classify_error_codes() {
        let scope = "read:content";
        assert!(matches!(
            classify(false, body(serde_json::json!({"error": "authorization_pending"})), scope),
            PollOutcome::Pending
        ));
        assert!(matches!(
            classify(false, body(serde_json::json!({"error": "slow_down"})), scope),
            PollOutcome::SlowDown
        ));
        assert!(matches!(
            classify(false, body(serde_json::json!({"error": "expired_token"})), scope),
            PollOutcome::Rejected(ref r) if r == "expired_token"
        ));
        assert!(matches!(
            classify(false, body(serde_json::json!({"error": "access_denied"})), scope),
            PollOutcome::Rejected(_)
        ));
        assert!(matches!(
            classify(false, body(serde_json::json!({"error": "server_busy"})), scope),
            PollOutcome::Transient(_)
        ));
        assert!(matches!(
            classify(true, body(serde_json::json!({})), scope),
            PollOutcome::Transient(_)
        ));
    }

    #[test]
    fn grant_falls_back_to_requested_scope_and_default_ttl() {
        let outcome = classify(
            true,
            body(serde_json::json!({"access_token": "at"})),
            "read:content read:download",
        );
        let PollOutcome::Granted(grant) = outcome else {
            panic!("expected a grant");
        };
        assert_eq!(grant.expires_in, 3600);
        assert!(grant.refresh_token.is_none());
        assert_eq!(grant.scopes.len(), 2);
    }

    #[tokio::test]
    async fn request_device_code_sends_client_and_device_id() {
        let app = Router::new().route(
            DEVICE_CODE_PATH,
            post(|Json(req): Json<serde_json::Value>| async move {
                assert_eq!(req["client_id"], "test-client");
                assert_eq!(req["scope"], "read:content read:download");
                assert_eq!(req["device_id"], "0123456789abcdef");
                Json(serde_json::json!({
                    "device_code": "mock_dc",
                    "user_code": "TEST-CODE",
                    "verification_uri": "https://example.com/device",
                    "expires_in": 600,
                    "interval": 1
                }))
            }),
        );
        let base = start_mock(app).await;

        let resp = request_device_code(
            &reqwest::Client::new(),
            &test_config(&base),
            "0123456789abcdef",
        )
        .await
        .unwrap();
        assert_eq!(resp.device_code, "mock_dc");
        assert_eq!(resp.expires_in, 600);
    }

    #[tokio::test]
    async fn request_device_code_server_error() {
        let app = Router::new().route(
            DEVICE_CODE_PATH,
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let base = start_mock(app).await;

        let err = request_device_code(&reqwest::Client::new(), &test_config(&base), "d")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(err.to_string().contains("device code request failed"));
    }

    #[tokio::test]
    async fn poll_pending_then_success() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let app = Router::new().route(
            TOKEN_PATH,
            post(move |Json(req): Json<serde_json::Value>| {
                let counter = Arc::clone(&counter);
                async move {
                    assert_eq!(req["grant_type"], DEVICE_CODE_GRANT);
                    assert_eq!(req["device_code"], "dc_123");
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (
                            StatusCode::BAD_REQUEST,
                            Json(serde_json::json!({"error": "authorization_pending"})),
                        )
                    } else {
                        (
                            StatusCode::OK,
                            Json(serde_json::json!({
                                "access_token": "at_123",
                                "refresh_token": "rt_456",
                                "expires_in": 7200,
                                "scope": "read:content"
                            })),
                        )
                    }
                }
            }),
        );
        let base = start_mock(app).await;

        let grant = tokio::time::timeout(
            Duration::from_secs(5),
            poll_for_token(&reqwest::Client::new(), &test_config(&base), &code(0, 30)),
        )
        .await
        .expect("timed out")
        .unwrap();
        assert_eq!(grant.access_token, "at_123");
        assert_eq!(grant.refresh_token.as_deref(), Some("rt_456"));
        assert_eq!(grant.expires_in, 7200);
        assert!(grant.scopes.contains("read:content"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn poll_stops_on_access_denied() {
        let app = Router::new().route(
            TOKEN_PATH,
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"error": "access_denied"})),
                )
            }),
        );
        let base = start_mock(app).await;

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            poll_for_token(&reqwest::Client::new(), &test_config(&base), &code(0, 30)),
        )
        .await
        .expect("timed out")
        .unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[tokio::test]
    async fn poll_treats_unknown_errors_as_transient() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let app = Router::new().route(
            TOKEN_PATH,
            post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        (
                            StatusCode::SERVICE_UNAVAILABLE,
                            Json(serde_json::json!({"error": "temporarily_unavailable"})),
                        )
                    } else {
                        (StatusCode::OK, Json(serde_json::json!({"access_token": "late"})))
                    }
                }
            }),
        );
        let base = start_mock(app).await;

        let grant = poll_for_token(&reqwest::Client::new(), &test_config(&base), &code(0, 30))
            .await
            .unwrap();
        assert_eq!(grant.access_token, "late");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn poll_times_out_when_always_pending() {
        let app = Router::new().route(
            TOKEN_PATH,
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"error": "authorization_pending"})),
                )
            }),
        );
        let base = start_mock(app).await;

        let err = tokio::time::timeout(
            Duration::from_secs(10),
            poll_for_token(&reqwest::Client::new(), &test_config(&base), &code(1, 2)),
        )
        .await
        .expect("poll loop must respect expires_in")
        .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[test]
    fn poll_schedule_is_clamped() {
        let (budget, wait) = poll_schedule(&code(0, 30));
        assert_eq!(budget, Duration::from_secs(30));
        assert_eq!(wait, MIN_POLL_INTERVAL);

        let (budget, wait) = poll_schedule(&code(u64::MAX, u64::MAX));
        assert_eq!(budget, MAX_DEVICE_CODE_TTL);
        assert_eq!(wait, MAX_DEVICE_CODE_TTL);
    }

    #[tokio::test]
    async fn zero_interval_still_waits_between_polls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let app = Router::new().route(
            TOKEN_PATH,
            post(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    (
                        StatusCode::BAD_REQUEST,
                        Json(serde_json::json!({"error": "authorization_pending"})),
                    )
                }
            }),
        );
        let base = start_mock(app).await;

        let err = poll_for_token(&reqwest::Client::new(), &test_config(&base), &code(0, 2))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
        assert!(calls.load(Ordering::SeqCst) <= 3, "polled {} times", calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn refresh_grant_reports_failure() {
        let app = Router::new().route(
            TOKEN_PATH,
            post(|Json(req): Json<serde_json::Value>| async move {
                assert_eq!(req["grant_type"], "refresh_token");
                (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"error": "invalid_grant"})),
                )
            }),
        );
        let base = start_mock(app).await;

        let err = refresh_grant(&reqwest::Client::new(), &test_config(&base), "rt")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(err.to_string().contains("invalid_grant"));
    }
}
