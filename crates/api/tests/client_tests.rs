#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use {
    axum::{
        Json, Router,
        extract::{Query, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    chrono::Utc,
    claude_skills_api::{MarketplaceClient, SearchOptions, sign_request},
    claude_skills_common::{ContentType, Error},
    claude_skills_config::{MarketplaceConfig, RateLimitConfig},
    claude_skills_oauth::{Authenticator, CredentialStore, MemoryCredentialStore, Token},
    secrecy::Secret,
};

#[derive(Clone, Default)]
struct Mock {
    hits: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<(HeaderMap, HashMap<String, String>)>>>,
    bodies: Arc<Mutex<Vec<serde_json::Value>>>,
}

fn bearer(headers: &HeaderMap) -> String {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .trim_start_matches("Bearer ")
        .to_string()
}

async fn search(
    State(mock): State<Mock>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    mock.hits.fetch_add(1, Ordering::SeqCst);
    let token = bearer(&headers);
    mock.seen.lock().unwrap().push((headers, query));
    match token.as_str() {
        "stale-access" => StatusCode::UNAUTHORIZED.into_response(),
        "throttled-access" => (
            StatusCode::TOO_MANY_REQUESTS,
            [("retry-after", "42")],
            "slow down",
        )
            .into_response(),
        _ => Json(serde_json::json!({
            "items": [{
                "id": "c1",
                "name": "Demo Skill",
                "slug": "demo-skill",
                "type": "skill"
            }],
            "total": 1,
            "page": 1,
            "limit": 5
        }))
        .into_response(),
    }
}

async fn download(State(mock): State<Mock>, Json(body): Json<serde_json::Value>) -> Response {
    mock.hits.fetch_add(1, Ordering::SeqCst);
    mock.bodies.lock().unwrap().push(body);
    Json(serde_json::json!({
        "url": "/files/demo-skill.zip",
        "version": "1.0.0",
        "size": 4,
        "integrityHash": "deadbeef"
    }))
    .into_response()
}

async fn start(mock: Mock) -> String {
    let app = Router::new()
        .route("/functions/v1/search", get(search))
        .route("/functions/v1/download-skill", post(download))
        .route("/files/demo-skill.zip", get(|| async { b"PK\x03\x04".to_vec() }))
        .route(
            "/api/v1/auth/token",
            post(|| async {
                Json(serde_json::json!({"access_token": "fresh-access", "expires_in": 3600}))
            }),
        )
        .route(
            "/api/v1/user/me",
            get(|| async { Json(serde_json::json!({"id": "user-1"})) }),
        )
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn token(access: &str, refresh: Option<&str>) -> Token {
    Token {
        access_token: Secret::new(access.into()),
        refresh_token: refresh.map(|r| Secret::new(r.to_string())),
        expires_at: Utc::now() + chrono::Duration::hours(1),
        scopes: Default::default(),
        user_id: "user-1".into(),
        device_id: "0123456789abcdef".into(),
    }
}

fn client(
    base: &str,
    store: Arc<MemoryCredentialStore>,
    limits: RateLimitConfig,
) -> MarketplaceClient {
    let config = Arc::new(MarketplaceConfig {
        api_url: base.to_string(),
        rate_limits: limits,
        ..Default::default()
    });
    let auth = Authenticator::new(Arc::clone(&config), store)
        .unwrap()
        .with_device_id("0123456789abcdef");
    MarketplaceClient::new(config, Arc::new(auth)).unwrap()
}

fn store_with(token: Token) -> Arc<MemoryCredentialStore> {
    Arc::new(MemoryCredentialStore::with_token(&token).unwrap())
}

#[tokio::test]
async fn search_is_signed_and_carries_query() {
    let mock = Mock::default();
    let base = start(mock.clone()).await;
    let access = "0123456789abcdef0123456789abcdef-rest";
    let client = client(
        &base,
        store_with(token(access, None)),
        RateLimitConfig::default(),
    );

    let opts = SearchOptions {
        content_type: Some(ContentType::Skill),
        limit: Some(5),
        ..Default::default()
    };
    let result = client.search("demo", &opts).await.unwrap();
    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].install_name(), "demo-skill");

    let seen = mock.seen.lock().unwrap();
    let (headers, query) = &seen[0];
    assert_eq!(query["q"], "demo");
    assert_eq!(query["type"], "skill");
    assert_eq!(query["limit"], "5");
    assert!(
        headers["user-agent"]
            .to_str()
            .unwrap()
            .starts_with("claude-skills-cli/")
    );

    let timestamp = headers["x-request-timestamp"].to_str().unwrap();
    let expected = sign_request("GET", "/functions/v1/search", timestamp, "", access).unwrap();
    assert_eq!(headers["x-request-signature"].to_str().unwrap(), expected);
}

#[tokio::test]
async fn unauthorized_refreshes_once_and_replays() {
    let mock = Mock::default();
    let base = start(mock.clone()).await;
    let store = store_with(token("stale-access", Some("rt-1")));
    // A single search slot: the replay must not consume a second one.
    let limits = RateLimitConfig {
        search: 1,
        ..Default::default()
    };
    let client = client(&base, Arc::clone(&store), limits);

    let result = client.search("demo", &SearchOptions::default()).await.unwrap();
    assert_eq!(result.total, 1);
    assert_eq!(mock.hits.load(Ordering::SeqCst), 2);
    assert_eq!(store.get().unwrap().access_token(), "fresh-access");
    assert_eq!(store.get().unwrap().refresh_token(), Some("rt-1"));
}

#[tokio::test]
async fn unauthorized_without_refresh_token_asks_for_login() {
    let mock = Mock::default();
    let base = start(mock.clone()).await;
    let client = client(
        &base,
        store_with(token("stale-access", None)),
        RateLimitConfig::default(),
    );

    let err = client
        .search("demo", &SearchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
    assert!(err.to_string().contains("claude-skills login"));
    assert_eq!(mock.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_throttling_surfaces_retry_after() {
    let mock = Mock::default();
    let base = start(mock.clone()).await;
    let client = client(
        &base,
        store_with(token("throttled-access", None)),
        RateLimitConfig::default(),
    );

    let err = client
        .search("demo", &SearchOptions::default())
        .await
        .unwrap_err();
    let Error::RateLimit {
        message,
        retry_after_secs,
    } = err
    else {
        panic!("expected a rate limit error");
    };
    assert_eq!(retry_after_secs, Some(42));
    assert!(message.contains("42 seconds"));
}

#[tokio::test]
async fn local_limit_blocks_before_the_network() {
    let mock = Mock::default();
    let base = start(mock.clone()).await;
    let limits = RateLimitConfig {
        download: 1,
        ..Default::default()
    };
    let client = client(&base, store_with(token("good-access", None)), limits);

    let info = client
        .download_info(ContentType::Skill, "c1", Some("1.0.0"))
        .await
        .unwrap();
    assert_eq!(info.integrity_hash.as_deref(), Some("deadbeef"));

    let err = client
        .download_info(ContentType::Skill, "c1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RateLimit { .. }));
    assert_eq!(mock.hits.load(Ordering::SeqCst), 1);
    assert_eq!(
        mock.bodies.lock().unwrap()[0],
        serde_json::json!({"id": "c1", "version": "1.0.0"})
    );
}

#[tokio::test]
async fn missing_session_aborts_without_network() {
    let mock = Mock::default();
    let base = start(mock.clone()).await;
    let client = client(
        &base,
        Arc::new(MemoryCredentialStore::new()),
        RateLimitConfig::default(),
    );

    let err = client
        .search("demo", &SearchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
    assert!(err.to_string().contains("Not authenticated"));
    assert_eq!(mock.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn relative_archive_url_resolves_against_api_url() {
    let mock = Mock::default();
    let base = start(mock).await;
    let client = client(
        &base,
        store_with(token("good-access", None)),
        RateLimitConfig::default(),
    );

    let bytes = client.fetch_archive("/files/demo-skill.zip").await.unwrap();
    assert_eq!(bytes, b"PK\x03\x04");
    let bytes = client
        .fetch_archive(&format!("{base}/files/demo-skill.zip"))
        .await
        .unwrap();
    assert_eq!(bytes.len(), 4);
}

#[tokio::test]
async fn archive_fetches_count_against_download_cap() {
    let mock = Mock::default();
    let base = start(mock).await;
    let limits = RateLimitConfig {
        download: 1,
        ..Default::default()
    };
    let client = client(&base, store_with(token("good-access", None)), limits);

    client.fetch_archive("/files/demo-skill.zip").await.unwrap();
    let err = client
        .fetch_archive("/files/demo-skill.zip")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RateLimit { .. }), "{err}");
}
