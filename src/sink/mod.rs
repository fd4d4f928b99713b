pub mod json_lines;
pub mod log_sink;

use std::sync::Arc;

use async_trait::async_trait;

use crate::app::{Result, SinkError};
use crate::config::SinkConfig;
use crate::domain::Item;

pub use json_lines::JsonLinesSink;
pub use log_sink::LogSink;

/// Downstream consumer of newly detected items.
///
/// Retrying a failed delivery is the sink's own concern; the poller marks the
/// item seen either way.
#[async_trait]
pub trait Sink {
    async fn emit(&self, feed_id: &str, item: &Item) -> std::result::Result<(), SinkError>;
}

/// Build the sink selected in the configuration.
pub fn from_config(config: &SinkConfig) -> Result<Arc<dyn Sink + Send + Sync>> {
    let sink: Arc<dyn Sink + Send + Sync> = match config {
        SinkConfig::Log => Arc::new(LogSink),
        SinkConfig::JsonLines { path } => Arc::new(JsonLinesSink::open(path)?),
    };
    Ok(sink)
}
