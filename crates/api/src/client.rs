use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    chrono::Utc,
    claude_skills_common::{ContentType, Error, Result},
    claude_skills_config::MarketplaceConfig,
    claude_skills_oauth::{Authenticator, RELOGIN_HINT, Token},
    reqwest::{Method, Response, StatusCode, header},
    tracing::{debug, warn},
    url::Url,
};

use crate::{
    rate_limit::{EndpointCategory, RateLimiter},
    signing::{SIGNATURE_HEADER, TIMESTAMP_HEADER, sign_request},
    source::PackageSource,
    types::{DownloadInfo, SearchOptions, SearchResult},
};

pub const NOT_AUTHENTICATED: &str = "Not authenticated. Run \"claude-skills login\" first.";

/// One outbound request, kept around so it can be replayed after a refresh.
struct Outgoing<'a> {
    method: Method,
    url: Url,
    query: &'a [(&'static str, String)],
    body: Option<String>,
    /// Bearer token and signature are only sent to the marketplace itself.
    authorized: bool,
}

/// The only network gateway for marketplace calls.
///
/// Every request is authenticated, signed and counted against the local rate
/// limiter. A 401 triggers one refresh and one replay.
pub struct MarketplaceClient {
    config: Arc<MarketplaceConfig>,
    base: Url,
    http: reqwest::Client,
    auth: Arc<Authenticator>,
    limiter: RateLimiter,
}

impl MarketplaceClient {
    pub fn new(config: Arc<MarketplaceConfig>, auth: Arc<Authenticator>) -> Result<Self> {
        let base = Url::parse(config.base_url())
            .map_err(|e| Error::message(format!("invalid api_url {:?}: {e}", config.api_url)))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(Error::network)?;
        let limiter = RateLimiter::new(config.rate_limits.clone());
        Ok(Self {
            config,
            base,
            http,
            auth,
            limiter,
        })
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.auth
    }

    /// Absolute URL for a path relative to `api_url`, or `target` itself
    /// when it is already absolute.
    fn resolve(&self, target: &str) -> Result<Url> {
        let raw = if target.contains("://") {
            target.to_owned()
        } else {
            format!(
                "{}/{}",
                self.config.base_url(),
                target.trim_start_matches('/')
            )
        };
        Url::parse(&raw).map_err(|e| Error::message(format!("invalid request URL {raw:?}: {e}")))
    }

    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResult> {
        let path = self.config.function_path("search");
        let query = options.query_pairs(query);
        let resp = self.send(Method::GET, &path, &query, None).await?;
        resp.json().await.map_err(Error::network)
    }

    pub async fn download_info(
        &self,
        content_type: ContentType,
        id: &str,
        version: Option<&str>,
    ) -> Result<DownloadInfo> {
        let path = self
            .config
            .function_path(&format!("download-{}", content_type.as_str()));
        let mut body = serde_json::json!({ "id": id });
        if let Some(version) = version {
            body["version"] = serde_json::Value::from(version);
        }
        let resp = self.send(Method::POST, &path, &[], Some(&body)).await?;
        resp.json().await.map_err(Error::network)
    }

    /// Download the archive behind a [`DownloadInfo::url`].
    ///
    /// Always counted against the `download` cap, whatever host serves it.
    pub async fn fetch_archive(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .send_as(Some(EndpointCategory::Download), Method::GET, url, &[], None)
            .await?;
        let bytes = resp.bytes().await.map_err(Error::network)?;
        Ok(bytes.to_vec())
    }

    async fn send(
        &self,
        method: Method,
        target: &str,
        query: &[(&'static str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        self.send_as(None, method, target, query, body).await
    }

    /// `category` overrides classification by request path.
    async fn send_as(
        &self,
        category: Option<EndpointCategory>,
        method: Method,
        target: &str,
        query: &[(&'static str, String)],
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        let url = self.resolve(target)?;
        let request = Outgoing {
            authorized: url.origin() == self.base.origin(),
            method,
            url,
            query,
            body: body.map(serde_json::to_string).transpose()?,
        };

        let token = self
            .auth
            .authenticated_token()
            .await
            .ok_or_else(|| Error::auth(NOT_AUTHENTICATED))?;

        self.limiter
            .check(category.unwrap_or_else(|| EndpointCategory::from_path(request.url.path())))?;

        let resp = self.dispatch(&request, &token).await?;
        let resp = if resp.status() == StatusCode::UNAUTHORIZED && request.authorized {
            debug!(path = %request.url.path(), "request rejected with 401, refreshing token");
            let token = self.auth.refresh_stored().await?;
            let retry = self.dispatch(&request, &token).await?;
            if retry.status() == StatusCode::UNAUTHORIZED {
                return Err(Error::auth(RELOGIN_HINT));
            }
            retry
        } else {
            resp
        };

        check_status(&request, resp).await
    }

    async fn dispatch(&self, request: &Outgoing<'_>, token: &Token) -> Result<Response> {
        let mut builder = self
            .http
            .request(request.method.clone(), request.url.clone())
            .header(header::ACCEPT, "application/json");
        if !request.query.is_empty() {
            builder = builder.query(request.query);
        }
        if let Some(body) = &request.body {
            builder = builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.clone());
        }
        if request.authorized {
            let timestamp = Utc::now().timestamp_millis().to_string();
            let signature = sign_request(
                request.method.as_str(),
                request.url.path(),
                &timestamp,
                request.body.as_deref().unwrap_or_default(),
                token.access_token(),
            )?;
            builder = builder
                .bearer_auth(token.access_token())
                .header(SIGNATURE_HEADER, signature)
                .header(TIMESTAMP_HEADER, timestamp);
        }

        builder.send().await.map_err(Error::network)
    }
}

/// Parse `Retry-After` as delta-seconds.
fn retry_after_secs(headers: &header::HeaderMap) -> Option<u64> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

async fn check_status(request: &Outgoing<'_>, resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = retry_after_secs(resp.headers());
        let wait = retry_after.map_or_else(|| "a few".to_string(), |s| s.to_string());
        warn!(path = %request.url.path(), ?retry_after, "server rate limit hit");
        return Err(Error::rate_limited(
            format!("Rate limit exceeded. Please wait {wait} seconds before retrying."),
            retry_after,
        ));
    }

    let body = resp.text().await.unwrap_or_default();
    Err(Error::network(format!(
        "{} {} returned {status}: {}",
        request.method,
        request.url.path(),
        body.trim()
    )))
}

#[async_trait]
impl PackageSource for MarketplaceClient {
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResult> {
        MarketplaceClient::search(self, query, options).await
    }

    async fn download_info(
        &self,
        content_type: ContentType,
        id: &str,
        version: Option<&str>,
    ) -> Result<DownloadInfo> {
        MarketplaceClient::download_info(self, content_type, id, version).await
    }

    async fn fetch_archive(&self, url: &str) -> Result<Vec<u8>> {
        MarketplaceClient::fetch_archive(self, url).await
    }
}
