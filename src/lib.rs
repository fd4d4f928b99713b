//! # Freshet
//!
//! A daemon that polls RSS/Atom feeds on a per-feed schedule and hands
//! every item it has not seen before to a sink, exactly once per feed.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler → Fetcher → Normalizer → DedupStore → Sink
//! ```
//!
//! Each tick the [`daemon`] asks the [`scheduler`] which feeds are due and
//! polls them concurrently. Successes reset a feed's backoff; transient
//! failures double it up to a cap. Seen item ids and the schedule live in
//! one SQLite database, so a restart neither re-emits items nor forgets
//! which feeds are backing off.
//!
//! ## Quick Start
//!
//! ```bash
//! # Poll every feed once
//! freshet check
//!
//! # Run the daemon
//! freshet run
//!
//! # Inspect per-feed state
//! freshet status
//! ```

/// Application context and error types.
///
/// The [`AppContext`](app::AppContext) struct wires together all components:
/// store, fetcher, sink and the parallel poller.
pub mod app;

/// Command-line interface using clap.
pub mod cli;

/// TOML configuration with human-readable intervals.
pub mod config;

/// The long-running poll loop, PID file and graceful shutdown.
pub mod daemon;

/// Core domain models.
///
/// - [`FeedConfig`](domain::FeedConfig): a configured feed and its poll interval
/// - [`Item`](domain::Item): a normalized entry with a stable id
/// - [`ScheduleState`](domain::ScheduleState): per-feed scheduling bookkeeping
pub mod domain;

/// HTTP fetching with timeouts, conditional requests and error classification.
pub mod fetcher;

pub mod logging;

/// Feed parsing and item identity.
///
/// Converts RSS 0.9x/1.0/2.0, Atom and JSON Feed documents into
/// [`Item`](domain::Item)s through feed-rs.
pub mod normalizer;

/// One poll cycle per feed, and a bounded pool that runs many at once.
pub mod poller;

/// Due-time bookkeeping and exponential backoff.
pub mod scheduler;

/// Destinations for new items.
pub mod sink;

/// SQLite persistence for seen ids and the schedule.
///
/// - [`DedupStore`](store::DedupStore): seen-id operations
/// - [`ScheduleStore`](store::ScheduleStore): schedule persistence
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation of both
pub mod store;
