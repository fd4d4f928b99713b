pub mod http_fetcher;

use std::time::Duration;

use async_trait::async_trait;

use crate::app::FetchError;
use crate::domain::CacheValidators;

pub use http_fetcher::HttpFetcher;

#[derive(Debug)]
pub enum FetchResult {
    /// New content fetched successfully
    Content {
        body: Vec<u8>,
        validators: CacheValidators,
    },
    /// Content not modified (HTTP 304)
    NotModified,
}

/// Retrieves raw feed documents. Implementations never retry; retry is the
/// scheduler's business.
#[async_trait]
pub trait Fetcher {
    async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
        validators: &CacheValidators,
    ) -> Result<FetchResult, FetchError>;
}
