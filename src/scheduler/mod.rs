//! Per-feed polling schedule with exponential backoff.
//!
//! Each feed cycles through `DUE -> POLLING -> SUCCESS | FAILURE -> DUE`.
//! The scheduler never reads the clock itself: every operation takes `now`,
//! which keeps it deterministic under test.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{CacheValidators, FeedConfig, ScheduleState};

/// Exponential backoff capped at `max_interval`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_interval: Duration,
}

impl BackoffPolicy {
    pub fn new(max_interval: Duration) -> Self {
        Self { max_interval }
    }

    /// `min(poll_interval * 2^failures, max_interval)`, saturating.
    pub fn delay(&self, poll_interval: Duration, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        poll_interval
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.max_interval)
    }
}

pub struct Scheduler {
    feeds: Vec<FeedConfig>,
    states: HashMap<String, ScheduleState>,
    policy: BackoffPolicy,
}

impl Scheduler {
    /// Build a scheduler for `feeds`, resuming from `persisted` state where
    /// present. Feeds without persisted state are due at `now`.
    pub fn new(
        feeds: Vec<FeedConfig>,
        mut persisted: HashMap<String, ScheduleState>,
        policy: BackoffPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let states = feeds
            .iter()
            .map(|feed| {
                let state = persisted
                    .remove(&feed.feed_id)
                    .unwrap_or_else(|| ScheduleState::due_at(now));
                (feed.feed_id.clone(), state)
            })
            .collect();

        if !persisted.is_empty() {
            tracing::debug!(
                "Ignoring schedule state for {} feed(s) no longer configured",
                persisted.len()
            );
        }

        Self {
            feeds,
            states,
            policy,
        }
    }

    pub fn feeds(&self) -> &[FeedConfig] {
        &self.feeds
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn state(&self, feed_id: &str) -> Option<&ScheduleState> {
        self.states.get(feed_id)
    }

    pub fn is_due(&self, feed_id: &str, now: DateTime<Utc>) -> bool {
        self.states
            .get(feed_id)
            .map(|s| s.is_due(now))
            .unwrap_or(false)
    }

    /// Feeds whose `next_due_at` has passed, in configuration order.
    pub fn due_feeds(&self, now: DateTime<Utc>) -> Vec<FeedConfig> {
        self.feeds
            .iter()
            .filter(|f| self.is_due(&f.feed_id, now))
            .cloned()
            .collect()
    }

    /// Earliest `next_due_at` across all feeds.
    pub fn next_wake(&self) -> Option<DateTime<Utc>> {
        self.states.values().map(|s| s.next_due_at).min()
    }

    /// `validators` is `Some` when fresh content was processed and `None`
    /// after a 304, which keeps the stored validators.
    pub fn on_success(
        &mut self,
        feed_id: &str,
        now: DateTime<Utc>,
        validators: Option<CacheValidators>,
    ) {
        let Some(interval) = self.poll_interval(feed_id) else {
            return;
        };
        if let Some(state) = self.states.get_mut(feed_id) {
            state.consecutive_failures = 0;
            state.next_due_at = after(now, interval);
            state.last_polled_at = Some(now);
            state.last_error = None;
            if let Some(v) = validators {
                state.validators = v;
                state.last_content_at = Some(now);
            }
        }
    }

    /// A failure worth retrying later: grow the backoff.
    pub fn on_transient_failure(&mut self, feed_id: &str, now: DateTime<Utc>, reason: &str) {
        let Some(interval) = self.poll_interval(feed_id) else {
            return;
        };
        let policy = self.policy;
        if let Some(state) = self.states.get_mut(feed_id) {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            let delay = policy.delay(interval, state.consecutive_failures);
            state.next_due_at = after(now, delay);
            state.last_polled_at = Some(now);
            state.last_error = Some(reason.to_string());
        }
    }

    /// A failure that backoff won't fix (404, malformed document). The feed
    /// keeps its normal schedule, flagged with `reason`.
    pub fn on_permanent_failure(&mut self, feed_id: &str, now: DateTime<Utc>, reason: &str) {
        let Some(interval) = self.poll_interval(feed_id) else {
            return;
        };
        if let Some(state) = self.states.get_mut(feed_id) {
            state.consecutive_failures = 0;
            state.next_due_at = after(now, interval);
            state.last_polled_at = Some(now);
            state.last_error = Some(reason.to_string());
        }
    }

    /// Current state of every configured feed, for persistence.
    pub fn snapshot(&self) -> Vec<(String, ScheduleState)> {
        self.feeds
            .iter()
            .filter_map(|f| {
                self.states
                    .get(&f.feed_id)
                    .map(|s| (f.feed_id.clone(), s.clone()))
            })
            .collect()
    }

    fn poll_interval(&self, feed_id: &str) -> Option<Duration> {
        self.feeds
            .iter()
            .find(|f| f.feed_id == feed_id)
            .map(|f| f.poll_interval)
    }
}

fn after(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(d)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
