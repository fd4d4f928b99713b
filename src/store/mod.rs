pub mod sqlite;

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::app::StorageError;
use crate::domain::ScheduleState;

pub use sqlite::SqliteStore;

/// Remembers which item ids were already emitted, per feed.
pub trait DedupStore {
    fn has_seen(&self, feed_id: &str, item_id: &str) -> Result<bool, StorageError>;

    /// Record `item_id` as seen at `at`. Idempotent; an existing row only has
    /// its `last_seen_at` refreshed.
    fn mark_seen_at(&self, feed_id: &str, item_id: &str, at: DateTime<Utc>)
        -> Result<(), StorageError>;

    fn mark_seen(&self, feed_id: &str, item_id: &str) -> Result<(), StorageError> {
        self.mark_seen_at(feed_id, item_id, Utc::now())
    }

    /// Forget ids whose `last_seen_at` is before `older_than`. Returns how many were removed.
    fn prune(&self, feed_id: &str, older_than: DateTime<Utc>) -> Result<usize, StorageError>;

    fn seen_count(&self, feed_id: &str) -> Result<usize, StorageError>;
}

/// Durable home for the scheduler's per-feed state.
pub trait ScheduleStore {
    fn load_schedule(&self) -> Result<HashMap<String, ScheduleState>, StorageError>;

    /// Replace the stored state of every listed feed in one transaction.
    fn save_schedule(&self, states: &[(String, ScheduleState)]) -> Result<(), StorageError>;
}

/// Run a storage operation, retrying once on failure.
pub fn retry_once<T>(mut op: impl FnMut() -> Result<T, StorageError>) -> Result<T, StorageError> {
    match op() {
        Ok(v) => Ok(v),
        Err(e) => {
            tracing::warn!("Storage operation failed, retrying once: {}", e);
            op()
        }
    }
}
