use std::sync::Arc;

use crate::app::Result;
use crate::config::Config;
use crate::fetcher::{Fetcher, HttpFetcher};
use crate::normalizer::Normalizer;
use crate::poller::{FeedPoller, ParallelPoller};
use crate::sink::{self, Sink};
use crate::store::SqliteStore;

/// Wires the store, fetcher, normalizer and sink into a poller.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub parallel_poller: ParallelPoller,
}

impl AppContext {
    /// Open persisted state and build all components from `config`.
    ///
    /// Fails when the state database cannot be opened or is corrupt.
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(config.state_path()?)?);
        let fetcher: Arc<dyn Fetcher + Send + Sync> =
            Arc::new(HttpFetcher::new(config.daemon.max_body_bytes)?);
        let sink = sink::from_config(&config.sink)?;

        Ok(Self::with_components(config, store, fetcher, sink))
    }

    /// Assemble a context from ready-made parts.
    pub fn with_components(
        config: Config,
        store: Arc<SqliteStore>,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        sink: Arc<dyn Sink + Send + Sync>,
    ) -> Self {
        let poller = FeedPoller::new(
            fetcher,
            Normalizer::new(),
            store.clone(),
            sink,
            config.daemon.fetch_timeout,
        );
        let parallel_poller = ParallelPoller::with_workers(poller, config.daemon.workers);

        Self {
            config,
            store,
            parallel_poller,
        }
    }
}
