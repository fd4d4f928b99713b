use async_trait::async_trait;

use crate::app::SinkError;
use crate::domain::Item;
use crate::sink::Sink;

/// Writes every new item to the log at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn emit(&self, feed_id: &str, item: &Item) -> Result<(), SinkError> {
        tracing::info!(
            feed = %feed_id,
            item = %item.item_id,
            link = item.link.as_deref().unwrap_or(""),
            "New item: {}",
            item.display_title()
        );
        Ok(())
    }
}
