use rusqlite::ffi::ErrorCode;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum FreshetError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, FreshetError>;

/// Transport-level failure while retrieving a feed.
///
/// Transient failures feed the scheduler's backoff; permanent ones keep the
/// normal schedule but are flagged on the feed for the operator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("transient fetch failure: {0}")]
    Transient(String),

    #[error("permanent fetch failure: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("malformed feed document: {0}")]
    MalformedDocument(String),

    #[error("entry #{index} has no id, link or title")]
    Unidentifiable { index: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("persisted state is corrupt: {0}")]
    Corrupt(String),

    #[error("storage I/O failure: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if matches!(
                    err.code,
                    ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase
                ) =>
            {
                StorageError::Corrupt(e.to_string())
            }
            other => StorageError::Io(other.to_string()),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

/// Why a single feed's poll did not complete cleanly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("poll task failed: {0}")]
    Internal(String),
}

impl PollError {
    /// Short label used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            PollError::Fetch(FetchError::Transient(_)) => "fetch.transient",
            PollError::Fetch(FetchError::Permanent(_)) => "fetch.permanent",
            PollError::Parse(ParseError::MalformedDocument(_)) => "parse.malformed",
            PollError::Parse(ParseError::Unidentifiable { .. }) => "parse.unidentifiable",
            PollError::Storage(StorageError::Corrupt(_)) => "storage.corrupt",
            PollError::Storage(StorageError::Io(_)) => "storage.io",
            PollError::Internal(_) => "internal",
        }
    }

    /// Whether the scheduler should back off before the next attempt.
    pub fn wants_backoff(&self) -> bool {
        match self {
            PollError::Fetch(e) => e.is_transient(),
            PollError::Internal(_) => true,
            _ => false,
        }
    }
}
