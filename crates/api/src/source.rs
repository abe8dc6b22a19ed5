use {
    async_trait::async_trait,
    claude_skills_common::{ContentType, Result},
};

use crate::types::{DownloadInfo, SearchOptions, SearchResult};

/// Where the install pipeline gets packages from.
#[async_trait]
pub trait PackageSource: Send + Sync {
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResult>;

    async fn download_info(
        &self,
        content_type: ContentType,
        id: &str,
        version: Option<&str>,
    ) -> Result<DownloadInfo>;

    async fn fetch_archive(&self, url: &str) -> Result<Vec<u8>>;
}
