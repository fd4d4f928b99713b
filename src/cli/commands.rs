use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::app::{AppContext, FreshetError, Result};
use crate::config::format_interval;
use crate::daemon::{Daemon, TickSummary};
use crate::store::{retry_once, DedupStore, ScheduleStore};

fn refuse_if_daemon_running(ctx: &AppContext) -> Result<()> {
    let pid_path = Daemon::pid_file_path(&ctx.config.state_path()?);
    if Daemon::is_running(&pid_path) {
        return Err(FreshetError::Other(format!(
            "A daemon is running against this state (PID file {})",
            pid_path.display()
        )));
    }
    Ok(())
}

pub async fn run_daemon(ctx: Arc<AppContext>) -> Result<()> {
    let mut daemon = Daemon::new(ctx)?;
    daemon.run().await
}

/// Poll every configured feed once, regardless of schedule.
pub async fn check_feeds(ctx: Arc<AppContext>) -> Result<TickSummary> {
    refuse_if_daemon_running(&ctx)?;

    if ctx.config.feeds.is_empty() {
        println!("No feeds configured");
        return Ok(TickSummary::default());
    }

    println!("Polling {} feeds...", ctx.config.feeds.len());
    let mut daemon = Daemon::new(ctx)?;
    let summary = daemon.tick(true).await?;

    for feed in daemon.scheduler().feeds() {
        if let Some(err) = daemon
            .scheduler()
            .state(&feed.feed_id)
            .and_then(|s| s.last_error.as_ref())
        {
            eprintln!("  Error polling {}: {}", feed.feed_id, err);
        }
    }

    println!(
        "Check complete: {} new items, {} errors",
        summary.new_items, summary.errors
    );
    Ok(summary)
}

pub fn show_status(ctx: &AppContext) -> Result<()> {
    let pid_path = Daemon::pid_file_path(&ctx.config.state_path()?);
    if Daemon::is_running(&pid_path) {
        println!("Daemon is running");
    } else {
        println!("Daemon is not running");
    }

    let lines = status_lines(ctx, Utc::now())?;
    if lines.is_empty() {
        println!("No feeds configured");
    }
    for line in lines {
        println!("{}", line);
    }
    Ok(())
}

/// One line per configured feed, plus an indented line for its last error.
pub fn status_lines(ctx: &AppContext, now: DateTime<Utc>) -> Result<Vec<String>> {
    let schedule = ctx.store.load_schedule()?;
    let mut lines = Vec::new();

    for feed in &ctx.config.feeds {
        let seen = ctx.store.seen_count(&feed.feed_id)?;
        let state = schedule.get(&feed.feed_id);

        let due = match state {
            None => "never polled".to_string(),
            Some(s) if s.is_due(now) => "due now".to_string(),
            Some(s) => {
                let wait = s
                    .next_due_at
                    .signed_duration_since(now)
                    .to_std()
                    .unwrap_or_default();
                format!("due in {}", format_interval(Duration::from_secs(wait.as_secs())))
            }
        };
        let failures = state.map(|s| s.consecutive_failures).unwrap_or(0);

        lines.push(format!(
            "{}  {}  every {}  {}  failures {}  seen {}",
            feed.feed_id,
            feed.url,
            format_interval(feed.poll_interval),
            due,
            failures,
            seen
        ));
        if let Some(err) = state.and_then(|s| s.last_error.as_ref()) {
            lines.push(format!("    last error: {}", err));
        }
    }

    Ok(lines)
}

/// Remove seen ids not confirmed within `older_than` (default: retention)
/// of each feed's last fresh fetch. Feeds never fetched are left alone.
pub fn prune_seen(ctx: &AppContext, older_than: Option<Duration>) -> Result<usize> {
    let age = older_than.unwrap_or(ctx.config.daemon.retention);
    let schedule = ctx.store.load_schedule()?;
    let now = Utc::now();

    let mut total = 0;
    for feed in &ctx.config.feeds {
        let Some(cutoff) = schedule
            .get(&feed.feed_id)
            .and_then(|s| s.prune_cutoff(now, age))
        else {
            continue;
        };
        let removed = retry_once(|| ctx.store.prune(&feed.feed_id, cutoff))?;
        if removed > 0 {
            println!("  {}: pruned {} ids", feed.feed_id, removed);
        }
        total += removed;
    }

    println!(
        "Pruned {} seen ids older than {}",
        total,
        format_interval(age)
    );
    Ok(total)
}
