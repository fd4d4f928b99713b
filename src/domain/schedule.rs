use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::scheduler::BackoffPolicy;

/// HTTP validators remembered from the last successful fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheValidators {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

/// Per-feed scheduling bookkeeping, persisted across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleState {
    pub next_due_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Set when the last poll failed in a way an operator should look at.
    pub last_error: Option<String>,
    /// Last time fresh content was fetched and every listed item had its
    /// seen timestamp refreshed. Not moved by 304 responses or failures.
    pub last_content_at: Option<DateTime<Utc>>,
    pub validators: CacheValidators,
}

impl ScheduleState {
    /// State for a feed that has never been polled: due right away.
    pub fn due_at(now: DateTime<Utc>) -> Self {
        Self {
            next_due_at: now,
            consecutive_failures: 0,
            last_polled_at: None,
            last_error: None,
            last_content_at: None,
            validators: CacheValidators::default(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        now >= self.next_due_at
    }

    /// Delay that will follow the next poll if the feed keeps failing at its current rate.
    pub fn current_backoff(&self, poll_interval: Duration, policy: &BackoffPolicy) -> Duration {
        if self.consecutive_failures == 0 {
            poll_interval
        } else {
            policy.delay(poll_interval, self.consecutive_failures)
        }
    }

    /// Seen ids last confirmed before the returned time may be pruned.
    ///
    /// Retention counts back from the last fresh fetch rather than from `now`,
    /// so ids of a feed answering 304 or stuck failing stay put. `None` when
    /// the feed's content was never recorded.
    pub fn prune_cutoff(&self, now: DateTime<Utc>, retention: Duration) -> Option<DateTime<Utc>> {
        let anchor = self.last_content_at?.min(now);
        let retention = chrono::Duration::from_std(retention).ok()?;
        anchor.checked_sub_signed(retention)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const DAY: Duration = Duration::from_secs(86400);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_prune_cutoff_counts_from_last_fresh_fetch() {
        let mut state = ScheduleState::due_at(now());
        state.last_content_at = Some(now() - chrono::Duration::days(40));

        assert_eq!(
            state.prune_cutoff(now(), 30 * DAY),
            Some(now() - chrono::Duration::days(70))
        );
    }

    #[test]
    fn test_prune_cutoff_for_recent_fetch() {
        let mut state = ScheduleState::due_at(now());
        state.last_content_at = Some(now());

        assert_eq!(
            state.prune_cutoff(now(), 30 * DAY),
            Some(now() - chrono::Duration::days(30))
        );
    }

    #[test]
    fn test_no_cutoff_before_first_fresh_fetch() {
        let mut state = ScheduleState::due_at(now());
        state.last_polled_at = Some(now());
        assert_eq!(state.prune_cutoff(now(), 30 * DAY), None);
    }
}
