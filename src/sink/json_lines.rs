use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::app::{Result, SinkError};
use crate::domain::Item;
use crate::sink::Sink;

/// Appends each new item as one JSON object per line.
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

#[derive(Serialize)]
struct Record<'a> {
    feed_id: &'a str,
    emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    item: &'a Item,
}

impl JsonLinesSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl Sink for JsonLinesSink {
    async fn emit(&self, feed_id: &str, item: &Item) -> std::result::Result<(), SinkError> {
        let record = Record {
            feed_id,
            emitted_at: Utc::now(),
            item,
        };
        let mut line =
            serde_json::to_string(&record).map_err(|e| SinkError::Delivery(e.to_string()))?;
        line.push('\n');

        let mut file = self
            .file
            .lock()
            .map_err(|e| SinkError::Delivery(format!("sink lock poisoned: {}", e)))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| SinkError::Delivery(format!("{}: {}", self.path.display(), e)))
    }
}
