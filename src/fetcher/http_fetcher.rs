use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};

use crate::app::{FetchError, FreshetError, Result};
use crate::domain::CacheValidators;
use crate::fetcher::{FetchResult, Fetcher};

const CONNECT_TIMEOUT_SECS: u64 = 10;

const MAX_REDIRECTS: usize = 5;

const USER_AGENT: &str = concat!("freshet/", env!("CARGO_PKG_VERSION"));

pub struct HttpFetcher {
    client: Client,
    max_body_bytes: u64,
}

impl HttpFetcher {
    pub fn new(max_body_bytes: u64) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .gzip(true)
            .brotli(true)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FreshetError::Other(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_body_bytes,
        })
    }
}

/// Map a non-success HTTP status onto the fetch error taxonomy.
pub fn classify_status(status: StatusCode) -> std::result::Result<(), FetchError> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        Err(FetchError::Transient(format!("HTTP {}", status)))
    } else {
        Err(FetchError::Permanent(format!("HTTP {}", status)))
    }
}

fn classify_error(e: reqwest::Error) -> FetchError {
    if let Some(status) = e.status() {
        if let Err(err) = classify_status(status) {
            return err;
        }
    }
    if e.is_builder() || e.is_redirect() {
        FetchError::Permanent(e.to_string())
    } else {
        // timeouts, connect/DNS failures, truncated bodies
        FetchError::Transient(e.to_string())
    }
}

fn validate_url(url: &str) -> std::result::Result<(), FetchError> {
    let parsed = url::Url::parse(url)
        .map_err(|e| FetchError::Permanent(format!("invalid URL {}: {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(FetchError::Permanent(format!("unsupported scheme: {}", other))),
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
        validators: &CacheValidators,
    ) -> std::result::Result<FetchResult, FetchError> {
        validate_url(url)?;

        let mut headers = HeaderMap::new();

        if let Some(ref etag) = validators.etag {
            if let Ok(value) = HeaderValue::from_str(etag) {
                headers.insert(IF_NONE_MATCH, value);
            }
        }

        if let Some(ref last_modified) = validators.last_modified {
            if let Ok(value) = HeaderValue::from_str(last_modified) {
                headers.insert(IF_MODIFIED_SINCE, value);
            }
        }

        let mut response = self
            .client
            .get(url)
            .headers(headers)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_error)?;

        if response.status() == StatusCode::NOT_MODIFIED {
            return Ok(FetchResult::NotModified);
        }

        classify_status(response.status())?;

        if let Some(len) = response.content_length() {
            if len > self.max_body_bytes {
                return Err(FetchError::Permanent(format!(
                    "feed too large: {} bytes (max {} bytes)",
                    len, self.max_body_bytes
                )));
            }
        }

        let validators = CacheValidators {
            etag: response
                .headers()
                .get("etag")
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            last_modified: response
                .headers()
                .get("last-modified")
                .and_then(|v| v.to_str().ok())
                .map(String::from),
        };

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(classify_error)? {
            if (body.len() + chunk.len()) as u64 > self.max_body_bytes {
                return Err(FetchError::Permanent(format!(
                    "feed too large: more than {} bytes",
                    self.max_body_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchResult::Content { body, validators })
    }
}
