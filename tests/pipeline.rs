//! End-to-end scenarios through the daemon with fake network and sink.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use freshet::app::{AppContext, FetchError, SinkError};
use freshet::config::Config;
use freshet::daemon::Daemon;
use freshet::domain::{CacheValidators, FeedConfig, Item};
use freshet::fetcher::{FetchResult, Fetcher};
use freshet::sink::Sink;
use freshet::store::{DedupStore, ScheduleStore, SqliteStore};

#[derive(Default)]
struct FakeFetcher {
    responses: Mutex<HashMap<String, Result<Vec<u8>, FetchError>>>,
}

impl FakeFetcher {
    fn serve(&self, url: &str, response: Result<Vec<u8>, FetchError>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), response);
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(
        &self,
        url: &str,
        _timeout: Duration,
        _validators: &CacheValidators,
    ) -> Result<FetchResult, FetchError> {
        let response = self.responses.lock().unwrap().get(url).cloned();
        match response {
            Some(Ok(body)) => Ok(FetchResult::Content {
                body,
                validators: CacheValidators::default(),
            }),
            Some(Err(e)) => Err(e),
            None => Err(FetchError::Permanent("HTTP 404 Not Found".into())),
        }
    }
}

#[derive(Default)]
struct CollectingSink {
    items: Mutex<Vec<(String, Item)>>,
}

impl CollectingSink {
    fn titles(&self) -> Vec<String> {
        self.items
            .lock()
            .unwrap()
            .iter()
            .map(|(_, item)| item.title.clone().unwrap_or_default())
            .collect()
    }
}

#[async_trait]
impl Sink for CollectingSink {
    async fn emit(&self, feed_id: &str, item: &Item) -> Result<(), SinkError> {
        self.items
            .lock()
            .unwrap()
            .push((feed_id.to_string(), item.clone()));
        Ok(())
    }
}

fn rss(items: &[(&str, &str)]) -> Vec<u8> {
    let entries: String = items
        .iter()
        .map(|(guid, title)| {
            format!(
                "<item><guid>{guid}</guid><title>{title}</title>\
                 <link>https://example.com/posts/{guid}</link></item>"
            )
        })
        .collect();
    format!(
        r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Example</title>{entries}</channel></rss>"#
    )
    .into_bytes()
}

fn context(
    dir: &Path,
    feeds: Vec<FeedConfig>,
    fetcher: Arc<FakeFetcher>,
    sink: Arc<CollectingSink>,
) -> Arc<AppContext> {
    let mut config = Config::default();
    config.daemon.state_path = Some(dir.join("state.db"));
    config.daemon.max_interval = Duration::from_secs(3600);
    config.feeds = feeds;
    let store = Arc::new(SqliteStore::open(config.state_path().unwrap()).unwrap());
    Arc::new(AppContext::with_components(config, store, fetcher, sink))
}

const FEED_URL: &str = "https://example.com/feed.xml";

#[tokio::test]
async fn new_items_are_emitted_once_in_feed_order() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher::default());
    fetcher.serve(FEED_URL, Ok(rss(&[("3", "Third"), ("2", "Second"), ("1", "First")])));
    let sink = Arc::new(CollectingSink::default());
    let feeds = vec![FeedConfig::new("example", FEED_URL, Duration::from_secs(60))];
    let mut daemon = Daemon::new(context(dir.path(), feeds, fetcher, sink.clone())).unwrap();

    let first = daemon.tick(true).await.unwrap();
    assert_eq!(first.new_items, 3);
    assert_eq!(sink.titles(), vec!["Third", "Second", "First"]);

    let second = daemon.tick(true).await.unwrap();
    assert_eq!(second.new_items, 0);
    assert_eq!(sink.titles().len(), 3);
}

#[tokio::test]
async fn timeouts_back_off_exponentially_up_to_the_cap() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher::default());
    fetcher.serve(FEED_URL, Err(FetchError::Transient("request timed out".into())));
    let sink = Arc::new(CollectingSink::default());
    let feeds = vec![FeedConfig::new("slow", FEED_URL, Duration::from_secs(60))];
    let mut daemon = Daemon::new(context(dir.path(), feeds, fetcher, sink)).unwrap();

    let mut delays = Vec::new();
    for _ in 0..8 {
        daemon.tick(true).await.unwrap();
        let state = daemon.scheduler().state("slow").unwrap();
        let polled = state.last_polled_at.unwrap();
        delays.push((state.next_due_at - polled).num_seconds());
    }

    assert_eq!(&delays[..3], &[120, 240, 480]);
    assert_eq!(*delays.last().unwrap(), 3600);
    assert!(!daemon.scheduler().is_due("slow", Utc::now()));
}

#[tokio::test]
async fn malformed_feed_next_to_healthy_feed() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher::default());
    let healthy = "https://example.com/healthy.xml";
    let broken = "https://example.com/broken.xml";
    fetcher.serve(healthy, Ok(rss(&[("a", "Alpha")])));
    fetcher.serve(broken, Ok(b"<html><body>Not a feed</body></html>".to_vec()));
    let sink = Arc::new(CollectingSink::default());
    let feeds = vec![
        FeedConfig::new("broken", broken, Duration::from_secs(300)),
        FeedConfig::new("healthy", healthy, Duration::from_secs(300)),
    ];
    let ctx = context(dir.path(), feeds, fetcher, sink.clone());
    let mut daemon = Daemon::new(ctx.clone()).unwrap();

    let summary = daemon.tick(false).await.unwrap();
    assert_eq!(summary.errors, 1);
    assert_eq!(sink.titles(), vec!["Alpha"]);

    let schedule = ctx.store.load_schedule().unwrap();
    let broken_state = &schedule["broken"];
    assert!(broken_state.last_error.is_some());
    assert_eq!(broken_state.consecutive_failures, 0);
    assert!(schedule["healthy"].last_error.is_none());
    assert_eq!(ctx.store.seen_count("broken").unwrap(), 0);
    assert_eq!(ctx.store.seen_count("healthy").unwrap(), 1);
}

#[tokio::test]
async fn state_round_trips_through_the_database_file() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(FakeFetcher::default());
    fetcher.serve(FEED_URL, Ok(rss(&[("a", "Alpha"), ("b", "Beta")])));
    let sink = Arc::new(CollectingSink::default());
    let feeds = vec![FeedConfig::new("example", FEED_URL, Duration::from_secs(600))];

    {
        let ctx = context(dir.path(), feeds.clone(), fetcher.clone(), sink.clone());
        let mut daemon = Daemon::new(ctx).unwrap();
        daemon.tick(false).await.unwrap();
    }

    fetcher.serve(FEED_URL, Ok(rss(&[("c", "Gamma"), ("a", "Alpha"), ("b", "Beta")])));
    let ctx = context(dir.path(), feeds, fetcher, sink.clone());
    let mut daemon = Daemon::new(ctx.clone()).unwrap();

    let state = daemon.scheduler().state("example").unwrap().clone();
    assert!(state.last_polled_at.is_some());
    assert!(!state.is_due(Utc::now()));

    let summary = daemon.tick(true).await.unwrap();
    assert_eq!(summary.new_items, 1);
    assert_eq!(sink.titles(), vec!["Alpha", "Beta", "Gamma"]);
    assert!(ctx.store.has_seen("example", "c").unwrap());
}
