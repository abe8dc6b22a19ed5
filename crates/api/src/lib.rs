//! Signed, rate-limited client for the marketplace API.

pub mod client;
pub mod rate_limit;
pub mod signing;
pub mod source;
pub mod types;

pub use {
    client::{MarketplaceClient, NOT_AUTHENTICATED},
    rate_limit::{EndpointCategory, RateLimiter},
    signing::sign_request,
    source::PackageSource,
    types::{Author, ContentItem, DownloadInfo, SearchOptions, SearchResult},
};
