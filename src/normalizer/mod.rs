use chrono::Utc;
use feed_rs::parser;
use html_escape::decode_html_entities;

use crate::app::ParseError;
use crate::domain::Item;

/// Result of normalizing one feed document.
#[derive(Debug, Clone, Default)]
pub struct NormalizedFeed {
    pub title: Option<String>,
    /// Items in document order.
    pub items: Vec<Item>,
    /// Entries dropped because no identity could be derived for them.
    pub skipped: Vec<ParseError>,
}

#[derive(Clone)]
pub struct Normalizer;

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn parse(&self, body: &[u8]) -> Result<NormalizedFeed, ParseError> {
        // Leave missing ids empty instead of letting feed-rs invent one, so
        // that guid-less entries get our link+title hash.
        let feed = parser::Builder::new()
            .id_generator(|_links, _title, _uri| String::new())
            .build()
            .parse(body)
            .map_err(|e| ParseError::MalformedDocument(e.to_string()))?;

        let title = feed.title.map(|t| decode_text(&t.content)).filter(|t| !t.is_empty());

        let mut items = Vec::with_capacity(feed.entries.len());
        let mut skipped = Vec::new();

        for (index, entry) in feed.entries.into_iter().enumerate() {
            let entry_title = entry
                .title
                .map(|t| decode_text(&t.content))
                .filter(|t| !t.is_empty());
            let link = entry
                .links
                .first()
                .map(|l| l.href.trim().to_string())
                .filter(|l| !l.is_empty());

            let guid = entry.id.trim();
            let item_id = if !guid.is_empty() {
                guid.to_string()
            } else if link.is_some() || entry_title.is_some() {
                Item::derive_id(link.as_deref(), entry_title.as_deref())
            } else {
                skipped.push(ParseError::Unidentifiable { index });
                continue;
            };

            let summary = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body))
                .map(|s| decode_text(&s))
                .filter(|s| !s.is_empty());

            items.push(Item {
                item_id,
                title: entry_title,
                link,
                published_at: entry
                    .published
                    .or(entry.updated)
                    .map(|dt| dt.with_timezone(&Utc)),
                summary,
            });
        }

        Ok(NormalizedFeed {
            title,
            items,
            skipped,
        })
    }
}

fn decode_text(s: &str) -> String {
    decode_html_entities(s.trim()).to_string()
}
