//! One polling cycle for one feed: fetch, normalize, dedup, emit, record.
//!
//! Emission happens before `mark_seen`, so a crash between the two yields at
//! most one duplicate on the next run and never a lost item.

pub mod parallel;

use std::sync::Arc;
use std::time::Duration;

use crate::app::PollError;
use crate::domain::{CacheValidators, FeedConfig};
use crate::fetcher::{FetchResult, Fetcher};
use crate::normalizer::Normalizer;
use crate::sink::Sink;
use crate::store::{retry_once, DedupStore};

pub use parallel::{ParallelPoller, DEFAULT_WORKERS};

/// Outcome of polling a single feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollResult {
    pub feed_id: String,
    pub new_items_emitted: usize,
    /// New items the sink rejected. They are still marked seen.
    pub sink_failures: usize,
    /// Entries dropped by the normalizer for lack of identity.
    pub skipped_entries: usize,
    pub not_modified: bool,
    /// Validators from a fresh response, to send with the next request.
    pub validators: Option<CacheValidators>,
    pub error: Option<PollError>,
}

impl PollResult {
    fn empty(feed_id: &str) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            new_items_emitted: 0,
            sink_failures: 0,
            skipped_entries: 0,
            not_modified: false,
            validators: None,
            error: None,
        }
    }

    pub fn failed(feed_id: &str, error: PollError) -> Self {
        Self {
            error: Some(error),
            ..Self::empty(feed_id)
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone)]
pub struct FeedPoller {
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    normalizer: Normalizer,
    store: Arc<dyn DedupStore + Send + Sync>,
    sink: Arc<dyn Sink + Send + Sync>,
    fetch_timeout: Duration,
}

impl FeedPoller {
    pub fn new(
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        normalizer: Normalizer,
        store: Arc<dyn DedupStore + Send + Sync>,
        sink: Arc<dyn Sink + Send + Sync>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            fetcher,
            normalizer,
            store,
            sink,
            fetch_timeout,
        }
    }

    pub async fn poll(&self, feed: &FeedConfig, validators: &CacheValidators) -> PollResult {
        let feed_id = feed.feed_id.as_str();
        let mut result = PollResult::empty(feed_id);

        let body = match self
            .fetcher
            .fetch(&feed.url, self.fetch_timeout, validators)
            .await
        {
            Ok(FetchResult::Content { body, validators }) => {
                result.validators = Some(validators);
                body
            }
            Ok(FetchResult::NotModified) => {
                tracing::debug!(feed = %feed_id, "Feed not modified");
                result.not_modified = true;
                return result;
            }
            Err(e) => {
                result.error = Some(e.into());
                return result;
            }
        };

        let parsed = match self.normalizer.parse(&body) {
            Ok(parsed) => parsed,
            Err(e) => {
                result.error = Some(e.into());
                return result;
            }
        };

        tracing::debug!(
            feed = %feed_id,
            title = parsed.title.as_deref().unwrap_or(""),
            "Parsed {} entries",
            parsed.items.len()
        );
        result.skipped_entries = parsed.skipped.len();
        for skipped in &parsed.skipped {
            tracing::warn!(feed = %feed_id, "{}", skipped);
        }

        for item in &parsed.items {
            let seen = match retry_once(|| self.store.has_seen(feed_id, &item.item_id)) {
                Ok(seen) => seen,
                Err(e) => {
                    result.error = Some(e.into());
                    return result;
                }
            };

            if !seen {
                match self.sink.emit(feed_id, item).await {
                    Ok(()) => result.new_items_emitted += 1,
                    Err(e) => {
                        result.sink_failures += 1;
                        tracing::error!(
                            feed = %feed_id,
                            item = %item.item_id,
                            "Sink rejected item: {}",
                            e
                        );
                    }
                }
            }

            // Also refreshes last_seen_at for items still in the feed, which
            // keeps them out of reach of pruning.
            if let Err(e) = retry_once(|| self.store.mark_seen(feed_id, &item.item_id)) {
                result.error = Some(e.into());
                return result;
            }
        }

        result
    }
}
