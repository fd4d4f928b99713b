//! Long-running poll loop.
//!
//! Each tick polls the feeds that are due, feeds the outcomes back into the
//! scheduler, persists the schedule and sleeps until the next feed is due.
//! SIGTERM/SIGINT stop the loop; polls in flight get `shutdown_grace` to
//! finish before they are abandoned.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::app::{AppContext, FreshetError, PollError, Result, StorageError};
use crate::config::format_interval;
use crate::domain::{CacheValidators, FeedConfig};
use crate::poller::PollResult;
use crate::scheduler::{BackoffPolicy, Scheduler};
use crate::store::{retry_once, DedupStore, ScheduleStore};

/// Sleep used when no feed is configured.
const IDLE_SLEEP: Duration = Duration::from_secs(60);

/// How often seen ids past their retention are pruned.
const PRUNE_EVERY: Duration = Duration::from_secs(3600);

/// Counters for one pass over the due feeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub polled: usize,
    pub new_items: usize,
    pub errors: usize,
}

/// Requests a graceful stop of a running [`Daemon`].
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.0.send_replace(true);
    }
}

/// Daemon runner
pub struct Daemon {
    ctx: Arc<AppContext>,
    scheduler: Scheduler,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    last_prune: Option<DateTime<Utc>>,
}

impl Daemon {
    /// Resume from the persisted schedule. Feeds seen for the first time are
    /// due immediately.
    pub fn new(ctx: Arc<AppContext>) -> Result<Self> {
        let persisted = ctx.store.load_schedule()?;
        let scheduler = Scheduler::new(
            ctx.config.feeds.clone(),
            persisted,
            BackoffPolicy::new(ctx.config.daemon.max_interval),
            Utc::now(),
        );
        let (tx, rx) = watch::channel(false);

        Ok(Self {
            ctx,
            scheduler,
            shutdown_tx: Arc::new(tx),
            shutdown_rx: rx,
            last_prune: None,
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(self.shutdown_tx.clone())
    }

    /// PID file kept next to the state database.
    pub fn pid_file_path(state_path: &Path) -> PathBuf {
        state_path.with_extension("pid")
    }

    /// Check if another daemon is already running against the same state.
    pub fn is_running(pid_path: &Path) -> bool {
        fs::read_to_string(pid_path)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .map(Self::process_exists)
            .unwrap_or(false)
    }

    #[cfg(unix)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid)])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    fn write_pid_file(pid_path: &Path) -> std::io::Result<()> {
        if let Some(parent) = pid_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(pid_path)?;
        writeln!(file, "{}", std::process::id())
    }

    /// Run until a shutdown is requested or storage fails.
    ///
    /// A clean shutdown persists the schedule and returns `Ok`.
    pub async fn run(&mut self) -> Result<()> {
        let pid_path = Self::pid_file_path(&self.ctx.config.state_path()?);
        if Self::is_running(&pid_path) {
            return Err(FreshetError::Other(format!(
                "Another daemon instance is already running (PID file {})",
                pid_path.display()
            )));
        }
        Self::write_pid_file(&pid_path).map_err(|e| {
            FreshetError::Other(format!("Failed to write PID file {}: {}", pid_path.display(), e))
        })?;

        let signals = tokio::spawn(wait_for_signal(self.shutdown_handle()));

        tracing::info!(
            feeds = self.scheduler.feeds().len(),
            workers = self.ctx.config.daemon.workers,
            pid = std::process::id(),
            "freshet daemon started"
        );

        let outcome = self.run_loop().await;

        signals.abort();
        let persisted = self.persist();
        let _ = fs::remove_file(&pid_path);

        match (outcome, persisted) {
            (Err(e), _) => {
                tracing::error!("Daemon stopped: {}", e);
                Err(e)
            }
            (Ok(()), Err(e)) => {
                tracing::error!("Failed to persist schedule on shutdown: {}", e);
                Err(e)
            }
            (Ok(()), Ok(())) => {
                tracing::info!("Daemon shut down cleanly");
                Ok(())
            }
        }
    }

    async fn run_loop(&mut self) -> Result<()> {
        let mut shutdown = self.shutdown_rx.clone();

        while !*shutdown.borrow() {
            self.tick(false).await?;

            if *shutdown.borrow() {
                break;
            }

            let pause = self.sleep_duration(Utc::now());
            tracing::debug!("Sleeping for {:?}", pause);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown_requested(&mut shutdown) => {}
            }
        }

        tracing::info!("Shutdown requested");
        Ok(())
    }

    /// Poll every due feed once, or every configured feed when `force` is set.
    ///
    /// A storage failure is returned after the rest of the batch has been
    /// recorded; the daemon treats it as fatal.
    pub async fn tick(&mut self, force: bool) -> Result<TickSummary> {
        let start = Utc::now();
        let due: Vec<FeedConfig> = if force {
            self.scheduler.feeds().to_vec()
        } else {
            self.scheduler.due_feeds(start)
        };

        let mut summary = TickSummary::default();
        let mut fatal: Option<StorageError> = None;

        if !due.is_empty() {
            let batch = due
                .into_iter()
                .map(|feed| {
                    let validators = self
                        .scheduler
                        .state(&feed.feed_id)
                        .map(|s| s.validators.clone())
                        .unwrap_or_default();
                    (feed, validators)
                })
                .collect();

            let results = self.poll_with_grace(batch).await;
            let finished = Utc::now();

            for result in results {
                if let Some(e) = self.record(result, finished, &mut summary) {
                    fatal.get_or_insert(e);
                }
            }

            self.persist()?;

            let elapsed = finished.signed_duration_since(start);
            tracing::info!(
                "Tick complete: {} feeds, {} new items, {} errors ({:.1}s)",
                summary.polled,
                summary.new_items,
                summary.errors,
                elapsed.num_milliseconds() as f64 / 1000.0
            );
        }

        if let Some(e) = fatal {
            return Err(e.into());
        }

        self.prune_if_due(Utc::now())?;
        Ok(summary)
    }

    async fn poll_with_grace(
        &self,
        batch: Vec<(FeedConfig, CacheValidators)>,
    ) -> Vec<PollResult> {
        let mut shutdown = self.shutdown_rx.clone();
        let grace = self.ctx.config.daemon.shutdown_grace;
        let polls = self.ctx.parallel_poller.poll_all(batch);
        tokio::pin!(polls);

        tokio::select! {
            results = &mut polls => results,
            _ = shutdown_requested(&mut shutdown) => {
                tracing::info!(
                    "Waiting up to {} for in-flight polls",
                    format_interval(grace)
                );
                match tokio::time::timeout(grace, &mut polls).await {
                    Ok(results) => results,
                    Err(_) => {
                        tracing::warn!("Abandoning in-flight polls after grace period");
                        Vec::new()
                    }
                }
            }
        }
    }

    /// Feed one poll outcome back into the scheduler.
    fn record(
        &mut self,
        result: PollResult,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) -> Option<StorageError> {
        let feed_id = result.feed_id.as_str();
        summary.polled += 1;
        summary.new_items += result.new_items_emitted;

        match result.error {
            None => {
                if result.new_items_emitted > 0 {
                    tracing::info!(
                        feed = %feed_id,
                        "{} new items",
                        result.new_items_emitted
                    );
                }
                if result.sink_failures > 0 {
                    summary.errors += 1;
                }
                self.scheduler.on_success(feed_id, now, result.validators);
                None
            }
            Some(PollError::Storage(e)) => {
                summary.errors += 1;
                tracing::error!(feed = %feed_id, kind = "storage", "Storage failure: {}", e);
                Some(e)
            }
            Some(e) if e.wants_backoff() => {
                summary.errors += 1;
                self.scheduler
                    .on_transient_failure(feed_id, now, &e.to_string());
                let retry_in = self
                    .scheduler
                    .state(feed_id)
                    .map(|s| s.next_due_at.signed_duration_since(now))
                    .and_then(|d| d.to_std().ok())
                    .unwrap_or_default();
                tracing::warn!(
                    feed = %feed_id,
                    kind = e.kind(),
                    "Poll failed, retrying in {}: {}",
                    format_interval(retry_in),
                    e
                );
                None
            }
            Some(e) => {
                summary.errors += 1;
                self.scheduler
                    .on_permanent_failure(feed_id, now, &e.to_string());
                tracing::error!(feed = %feed_id, kind = e.kind(), "Poll failed: {}", e);
                None
            }
        }
    }

    /// Write the whole schedule in one transaction, retrying once.
    fn persist(&self) -> Result<()> {
        let snapshot = self.scheduler.snapshot();
        retry_once(|| self.ctx.store.save_schedule(&snapshot))?;
        Ok(())
    }

    fn prune_if_due(&mut self, now: DateTime<Utc>) -> Result<()> {
        let due = match self.last_prune {
            None => true,
            Some(last) => now
                .signed_duration_since(last)
                .to_std()
                .map(|d| d >= PRUNE_EVERY)
                .unwrap_or(false),
        };
        if !due {
            return Ok(());
        }

        let retention = self.ctx.config.daemon.retention;
        for feed in self.scheduler.feeds() {
            let Some(cutoff) = self
                .scheduler
                .state(&feed.feed_id)
                .and_then(|s| s.prune_cutoff(now, retention))
            else {
                continue;
            };
            let removed = retry_once(|| self.ctx.store.prune(&feed.feed_id, cutoff))?;
            if removed > 0 {
                tracing::info!(feed = %feed.feed_id, "Pruned {} seen ids", removed);
            }
        }

        self.last_prune = Some(now);
        Ok(())
    }

    fn sleep_duration(&self, now: DateTime<Utc>) -> Duration {
        let min_sleep = self.ctx.config.daemon.min_sleep;
        match self.scheduler.next_wake() {
            Some(at) => at
                .signed_duration_since(now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .max(min_sleep),
            None => IDLE_SLEEP.max(min_sleep),
        }
    }
}

/// Resolve once the shutdown flag is set.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal(handle: ShutdownHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!("Failed to install signal handlers: {}", e);
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {},
        _ = sigint.recv() => {},
    }
    handle.trigger();
}

#[cfg(windows)]
async fn wait_for_signal(handle: ShutdownHandle) {
    if tokio::signal::ctrl_c().await.is_ok() {
        handle.trigger();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::app::FetchError;
    use crate::config::Config;
    use crate::domain::ScheduleState;
    use crate::poller::testing::{rss, RecordingSink, StaticFetcher};
    use crate::store::SqliteStore;

    const HEALTHY: &str = "https://example.com/healthy.xml";
    const BROKEN: &str = "https://example.com/broken.xml";

    fn config(dir: &Path, feeds: Vec<FeedConfig>) -> Config {
        let mut config = Config::default();
        config.daemon.state_path = Some(dir.join("state.db"));
        config.daemon.shutdown_grace = Duration::from_millis(100);
        config.feeds = feeds;
        config
    }

    fn context(
        config: Config,
        fetcher: Arc<StaticFetcher>,
        sink: Arc<RecordingSink>,
    ) -> Arc<AppContext> {
        let store = Arc::new(SqliteStore::open(config.state_path().unwrap()).unwrap());
        Arc::new(AppContext::with_components(config, store, fetcher, sink))
    }

    #[tokio::test]
    async fn test_malformed_feed_does_not_stop_healthy_one() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StaticFetcher::default());
        fetcher.set(HEALTHY, Ok(rss(&[("a", "A"), ("b", "B")])));
        fetcher.set(BROKEN, Ok(b"hello world".to_vec()));
        let sink = Arc::new(RecordingSink::default());
        let feeds = vec![
            FeedConfig::new("broken", BROKEN, Duration::from_secs(600)),
            FeedConfig::new("healthy", HEALTHY, Duration::from_secs(600)),
        ];
        let ctx = context(config(dir.path(), feeds), fetcher, sink.clone());
        let mut daemon = Daemon::new(ctx).unwrap();

        let summary = daemon.tick(false).await.unwrap();

        assert_eq!(summary.polled, 2);
        assert_eq!(summary.new_items, 2);
        assert_eq!(summary.errors, 1);
        assert_eq!(sink.ids(), vec!["a", "b"]);

        let broken = daemon.scheduler().state("broken").unwrap();
        assert!(broken.last_error.is_some());
        assert_eq!(broken.consecutive_failures, 0);
        let polled = broken.last_polled_at.unwrap();
        assert_eq!(broken.next_due_at - polled, chrono::Duration::seconds(600));

        let healthy = daemon.scheduler().state("healthy").unwrap();
        assert!(healthy.last_error.is_none());
    }

    #[tokio::test]
    async fn test_transient_failures_back_off() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StaticFetcher::default());
        fetcher.set(HEALTHY, Err(FetchError::Transient("HTTP 503".into())));
        let sink = Arc::new(RecordingSink::default());
        let feeds = vec![FeedConfig::new("feed", HEALTHY, Duration::from_secs(60))];
        let ctx = context(config(dir.path(), feeds), fetcher.clone(), sink);
        let mut daemon = Daemon::new(ctx).unwrap();

        for expected in [120, 240, 480] {
            daemon.tick(true).await.unwrap();
            let state = daemon.scheduler().state("feed").unwrap();
            let polled = state.last_polled_at.unwrap();
            assert_eq!(
                state.next_due_at - polled,
                chrono::Duration::seconds(expected)
            );
        }

        fetcher.set(HEALTHY, Ok(rss(&[("a", "A")])));
        daemon.tick(true).await.unwrap();
        let state = daemon.scheduler().state("feed").unwrap();
        assert_eq!(state.consecutive_failures, 0);
        assert!(state.last_error.is_none());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_schedule_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StaticFetcher::default());
        fetcher.set(HEALTHY, Ok(rss(&[("a", "A"), ("b", "B"), ("c", "C")])));
        let sink = Arc::new(RecordingSink::default());
        let feeds = vec![FeedConfig::new("feed", HEALTHY, Duration::from_secs(3600))];

        {
            let ctx = context(config(dir.path(), feeds.clone()), fetcher.clone(), sink.clone());
            let mut daemon = Daemon::new(ctx).unwrap();
            assert_eq!(daemon.tick(false).await.unwrap().new_items, 3);
        }

        let ctx = context(config(dir.path(), feeds), fetcher.clone(), sink.clone());
        let mut daemon = Daemon::new(ctx).unwrap();

        // Not due yet after the restart.
        assert_eq!(daemon.tick(false).await.unwrap().polled, 0);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        // Forced repoll of unchanged content emits nothing.
        assert_eq!(daemon.tick(true).await.unwrap().new_items, 0);
        assert_eq!(sink.ids().len(), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StaticFetcher::default());
        fetcher.set(HEALTHY, Ok(rss(&[("a", "A")])));
        let sink = Arc::new(RecordingSink::default());
        let feeds = vec![FeedConfig::new("feed", HEALTHY, Duration::from_secs(3600))];
        let cfg = config(dir.path(), feeds);
        let state_path = cfg.state_path().unwrap();
        let ctx = context(cfg, fetcher, sink.clone());

        let mut daemon = Daemon::new(ctx.clone()).unwrap();
        let handle = daemon.shutdown_handle();
        let task = tokio::spawn(async move { daemon.run().await });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(Daemon::pid_file_path(&state_path).exists());
        handle.trigger();

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_ok());
        assert!(!Daemon::pid_file_path(&state_path).exists());
        assert_eq!(sink.ids(), vec!["a"]);

        let persisted = ctx.store.load_schedule().unwrap();
        assert!(persisted["feed"].next_due_at > Utc::now());
    }

    #[tokio::test]
    async fn test_shutdown_abandons_slow_polls_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StaticFetcher::with_delay(Duration::from_secs(30)));
        fetcher.set(HEALTHY, Ok(rss(&[("a", "A")])));
        let sink = Arc::new(RecordingSink::default());
        let feeds = vec![FeedConfig::new("feed", HEALTHY, Duration::from_secs(60))];
        let ctx = context(config(dir.path(), feeds), fetcher, sink.clone());

        let mut daemon = Daemon::new(ctx.clone()).unwrap();
        let handle = daemon.shutdown_handle();
        let task = tokio::spawn(async move { daemon.run().await });

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.trigger();

        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_ok());
        assert!(sink.ids().is_empty());

        // Still due: the abandoned poll never completed.
        let persisted = ctx.store.load_schedule().unwrap();
        assert!(persisted["feed"].is_due(Utc::now()));
        assert!(persisted["feed"].last_polled_at.is_none());
    }

    /// Feed last fetched fresh 40 days ago, with one id still listed then and
    /// one that dropped out well before.
    fn seed_quiet_feed(ctx: &AppContext) {
        let now = Utc::now();
        let mut state = ScheduleState::due_at(now);
        state.last_content_at = Some(now - chrono::Duration::days(40));
        ctx.store.save_schedule(&[("feed".into(), state)]).unwrap();
        ctx.store
            .mark_seen_at("feed", "old", now - chrono::Duration::days(40))
            .unwrap();
        ctx.store
            .mark_seen_at("feed", "gone", now - chrono::Duration::days(80))
            .unwrap();
    }

    async fn assert_quiet_period_keeps_ids(quiet: impl Fn(&StaticFetcher)) {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StaticFetcher::default());
        quiet(&fetcher);
        let sink = Arc::new(RecordingSink::default());
        let feeds = vec![FeedConfig::new("feed", HEALTHY, Duration::from_secs(600))];
        let mut cfg = config(dir.path(), feeds);
        cfg.daemon.retention = Duration::from_secs(30 * 86400);
        let ctx = context(cfg, fetcher.clone(), sink.clone());
        seed_quiet_feed(&ctx);

        let mut daemon = Daemon::new(ctx.clone()).unwrap();
        daemon.tick(true).await.unwrap();

        assert!(ctx.store.has_seen("feed", "old").unwrap());
        assert!(!ctx.store.has_seen("feed", "gone").unwrap());

        fetcher.set(HEALTHY, Ok(rss(&[("old", "Old")])));
        let summary = daemon.tick(true).await.unwrap();
        assert_eq!(summary.new_items, 0);
        assert!(sink.ids().is_empty());
    }

    #[tokio::test]
    async fn test_not_modified_streak_does_not_prune_listed_ids() {
        assert_quiet_period_keeps_ids(|f| f.set_not_modified(HEALTHY)).await;
    }

    #[tokio::test]
    async fn test_outage_does_not_prune_listed_ids() {
        assert_quiet_period_keeps_ids(|f| {
            f.set(HEALTHY, Err(FetchError::Transient("connection refused".into())))
        })
        .await;
    }

    #[tokio::test]
    async fn test_validators_round_trip_through_ticks_and_restart() {
        let dir = tempfile::tempdir().unwrap();
        let v1 = CacheValidators {
            etag: Some("\"v1\"".into()),
            last_modified: Some("Wed, 01 Jan 2025 00:00:00 GMT".into()),
        };
        let fetcher = Arc::new(StaticFetcher::default());
        fetcher.set_with_validators(HEALTHY, rss(&[("a", "A")]), v1.clone());
        let sink = Arc::new(RecordingSink::default());
        let feeds = vec![FeedConfig::new("feed", HEALTHY, Duration::from_secs(600))];

        {
            let ctx = context(config(dir.path(), feeds.clone()), fetcher.clone(), sink.clone());
            let mut daemon = Daemon::new(ctx).unwrap();
            assert_eq!(daemon.tick(true).await.unwrap().new_items, 1);

            fetcher.set_not_modified(HEALTHY);
            let summary = daemon.tick(true).await.unwrap();
            assert_eq!(summary.new_items, 0);
            assert_eq!(summary.errors, 0);

            let state = daemon.scheduler().state("feed").unwrap();
            assert_eq!(state.validators, v1);
            assert!(state.last_error.is_none());
        }

        let ctx = context(config(dir.path(), feeds), fetcher.clone(), sink.clone());
        let mut daemon = Daemon::new(ctx).unwrap();
        daemon.tick(true).await.unwrap();

        assert_eq!(
            fetcher.sent_validators(),
            vec![CacheValidators::default(), v1.clone(), v1]
        );
        assert_eq!(sink.ids(), vec!["a"]);
    }

    #[test]
    fn test_stale_pid_file_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let pid_path = dir.path().join("state.pid");
        assert!(!Daemon::is_running(&pid_path));

        fs::write(&pid_path, "not a pid").unwrap();
        assert!(!Daemon::is_running(&pid_path));

        fs::write(&pid_path, format!("{}\n", std::process::id())).unwrap();
        #[cfg(unix)]
        assert!(Daemon::is_running(&pid_path));
    }
}
