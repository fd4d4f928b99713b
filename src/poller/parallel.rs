use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::app::PollError;
use crate::domain::{CacheValidators, FeedConfig};
use crate::poller::{FeedPoller, PollResult};

pub const DEFAULT_WORKERS: usize = 4;

/// Polls many feeds concurrently, bounded by a worker limit.
pub struct ParallelPoller {
    poller: FeedPoller,
    semaphore: Arc<Semaphore>,
}

impl ParallelPoller {
    pub fn new(poller: FeedPoller) -> Self {
        Self::with_workers(poller, DEFAULT_WORKERS)
    }

    pub fn with_workers(poller: FeedPoller, workers: usize) -> Self {
        Self {
            poller,
            semaphore: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    /// Poll every feed and collect one result per feed.
    ///
    /// Dropping the returned future aborts polls still in flight.
    pub async fn poll_all(&self, feeds: Vec<(FeedConfig, CacheValidators)>) -> Vec<PollResult> {
        let mut tasks = JoinSet::new();

        for (feed, validators) in feeds {
            let poller = self.poller.clone();
            let semaphore = self.semaphore.clone();

            tasks.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return PollResult::failed(
                            &feed.feed_id,
                            PollError::Internal("worker pool closed".into()),
                        )
                    }
                };

                let outcome = AssertUnwindSafe(poller.poll(&feed, &validators))
                    .catch_unwind()
                    .await;

                match outcome {
                    Ok(result) => result,
                    Err(panic) => {
                        let msg = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "panic".to_string());
                        PollResult::failed(&feed.feed_id, PollError::Internal(msg))
                    }
                }
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => {
                    tracing::error!("Task join error: {}", e);
                }
            }
        }

        results
    }
}
