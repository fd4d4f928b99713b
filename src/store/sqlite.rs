use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rusqlite_migration::{Migrations, M};

use crate::app::StorageError;
use crate::domain::{CacheValidators, ScheduleState};
use crate::store::{DedupStore, ScheduleStore};

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the state database at `path`.
    ///
    /// Fails with [`StorageError::Corrupt`] when the file exists but is not a
    /// healthy freshet database.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(mut conn: Connection) -> Result<Self, StorageError> {
        let status: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if status != "ok" {
            return Err(StorageError::Corrupt(status));
        }

        let migrations = Migrations::new(vec![
            M::up(include_str!("../../migrations/001-initial/up.sql")),
            M::up(include_str!("../../migrations/002-last-content/up.sql")),
        ]);
        migrations
            .to_latest(&mut conn)
            .map_err(|e| StorageError::Corrupt(format!("schema migration failed: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Io(format!("connection lock poisoned: {}", e)))
    }

    /// All ids recorded for a feed, sorted.
    pub fn seen_ids(&self, feed_id: &str) -> Result<Vec<String>, StorageError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT item_id FROM seen_items WHERE feed_id = ?1 ORDER BY item_id")?;
        let ids = stmt
            .query_map(params![feed_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    // Fixed-width so that string comparison in SQL matches time order.
    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StorageError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StorageError::Corrupt(format!("bad timestamp {:?}: {}", s, e)))
    }
}

impl DedupStore for SqliteStore {
    fn has_seen(&self, feed_id: &str, item_id: &str) -> Result<bool, StorageError> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT 1 FROM seen_items WHERE feed_id = ?1 AND item_id = ?2",
                params![feed_id, item_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn mark_seen_at(
        &self,
        feed_id: &str,
        item_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let at = Self::format_datetime(&at);
        conn.execute(
            "INSERT INTO seen_items (feed_id, item_id, first_seen_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(feed_id, item_id) DO UPDATE SET last_seen_at = MAX(last_seen_at, ?3)",
            params![feed_id, item_id, at],
        )?;
        Ok(())
    }

    fn prune(&self, feed_id: &str, older_than: DateTime<Utc>) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM seen_items WHERE feed_id = ?1 AND last_seen_at < ?2",
            params![feed_id, Self::format_datetime(&older_than)],
        )?;
        Ok(removed)
    }

    fn seen_count(&self, feed_id: &str) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM seen_items WHERE feed_id = ?1",
            params![feed_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl ScheduleStore for SqliteStore {
    fn load_schedule(&self) -> Result<HashMap<String, ScheduleState>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT feed_id, next_due_at, consecutive_failures, last_polled_at, last_error,
                    etag, last_modified, last_content_at
             FROM feed_schedule",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, u32>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, Option<String>>(7)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut states = HashMap::with_capacity(rows.len());
        for (
            feed_id,
            next_due_at,
            failures,
            last_polled_at,
            last_error,
            etag,
            last_modified,
            last_content_at,
        ) in rows
        {
            let state = ScheduleState {
                next_due_at: Self::parse_datetime(&next_due_at)?,
                consecutive_failures: failures,
                last_polled_at: last_polled_at
                    .as_deref()
                    .map(Self::parse_datetime)
                    .transpose()?,
                last_error,
                last_content_at: last_content_at
                    .as_deref()
                    .map(Self::parse_datetime)
                    .transpose()?,
                validators: CacheValidators {
                    etag,
                    last_modified,
                },
            };
            states.insert(feed_id, state);
        }

        Ok(states)
    }

    fn save_schedule(&self, states: &[(String, ScheduleState)]) -> Result<(), StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for (feed_id, state) in states {
            tx.execute(
                "INSERT INTO feed_schedule
                    (feed_id, next_due_at, consecutive_failures, last_polled_at, last_error,
                     etag, last_modified, last_content_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(feed_id) DO UPDATE SET
                    next_due_at = ?2, consecutive_failures = ?3, last_polled_at = ?4,
                    last_error = ?5, etag = ?6, last_modified = ?7, last_content_at = ?8",
                params![
                    feed_id,
                    Self::format_datetime(&state.next_due_at),
                    state.consecutive_failures,
                    state.last_polled_at.as_ref().map(Self::format_datetime),
                    state.last_error,
                    state.validators.etag,
                    state.validators.last_modified,
                    state.last_content_at.as_ref().map(Self::format_datetime),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }
}
