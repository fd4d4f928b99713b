use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::interval;

/// A monitored feed as declared in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(rename = "id")]
    pub feed_id: String,
    pub url: String,
    #[serde(rename = "interval", with = "interval", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

fn default_poll_interval() -> Duration {
    // The original monitor checked each feed every five minutes.
    Duration::from_secs(300)
}

impl FeedConfig {
    pub fn new(feed_id: impl Into<String>, url: impl Into<String>, poll_interval: Duration) -> Self {
        Self {
            feed_id: feed_id.into(),
            url: url.into(),
            poll_interval,
        }
    }
}
