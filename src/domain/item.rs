use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One normalized feed entry. Only `item_id` outlives a poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub item_id: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

impl Item {
    pub fn new(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            title: None,
            link: None,
            published_at: None,
            summary: None,
        }
    }

    /// Stable id for entries that carry no guid of their own.
    pub fn derive_id(link: Option<&str>, title: Option<&str>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(link.unwrap_or_default().as_bytes());
        hasher.update(b"\n");
        hasher.update(title.unwrap_or_default().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("(Untitled)")
    }
}
