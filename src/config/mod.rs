//! Configuration management for freshet.
//!
//! Configuration is read from `~/.config/freshet/config.toml` at startup
//! (or the path given with `--config`). If the default file doesn't exist,
//! a commented template is written and an empty configuration is used.

pub mod interval;

pub use interval::{format_interval, parse_interval};

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::domain::FeedConfig;

/// Longest accepted poll interval, backoff cap or retention. Keeps every
/// computed due time within the range the state database can store.
pub const MAX_CONFIG_INTERVAL: Duration = Duration::from_secs(3650 * 86400);

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub daemon: DaemonSettings,
    pub logging: LoggingConfig,
    pub sink: SinkConfig,
    pub feeds: Vec<FeedConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// SQLite database holding dedup and schedule state.
    pub state_path: Option<PathBuf>,
    /// Maximum number of feeds polled at the same time.
    pub workers: usize,
    #[serde(with = "interval")]
    pub fetch_timeout: Duration,
    /// Upper bound for the backoff delay of a failing feed.
    #[serde(with = "interval")]
    pub max_interval: Duration,
    /// Shortest sleep between two ticks.
    #[serde(with = "interval")]
    pub min_sleep: Duration,
    /// How long in-flight polls may run after a shutdown request.
    #[serde(with = "interval")]
    pub shutdown_grace: Duration,
    /// Seen ids not confirmed for this long are pruned.
    #[serde(with = "interval")]
    pub retention: Duration,
    pub max_body_bytes: u64,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            state_path: None,
            workers: 4,
            fetch_timeout: Duration::from_secs(30),
            max_interval: Duration::from_secs(86400),
            min_sleep: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(10),
            retention: Duration::from_secs(30 * 86400),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Also append log output to this file.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Where new items are delivered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    #[default]
    Log,
    JsonLines { path: PathBuf },
}

impl Config {
    /// Load configuration from `path`, or from the default location.
    ///
    /// An explicit path must exist. The default path is created with a
    /// commented template on first use.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let p = Self::default_config_path()?;
                if !p.exists() {
                    Self::create_default_config(&p)?;
                    return Ok(Self::default());
                }
                p
            }
        };

        let content = fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
            path: config_path.clone(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: config_path,
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path: `~/.config/freshet/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("freshet").join("config.toml"))
    }

    /// Resolved state database path, falling back to the user data directory.
    pub fn state_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(ref p) = self.daemon.state_path {
            return Ok(p.clone());
        }
        let data_dir = dirs::data_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(data_dir.join("freshet").join("state.db"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.workers == 0 {
            return Err(ConfigError::Invalid("daemon.workers must be at least 1".into()));
        }
        if self.daemon.fetch_timeout.is_zero() {
            return Err(ConfigError::Invalid("daemon.fetch_timeout must be non-zero".into()));
        }
        for (name, value) in [
            ("daemon.max_interval", self.daemon.max_interval),
            ("daemon.retention", self.daemon.retention),
            ("daemon.fetch_timeout", self.daemon.fetch_timeout),
            ("daemon.min_sleep", self.daemon.min_sleep),
            ("daemon.shutdown_grace", self.daemon.shutdown_grace),
        ] {
            if value > MAX_CONFIG_INTERVAL {
                return Err(ConfigError::Invalid(format!(
                    "{} must not exceed {}",
                    name,
                    format_interval(MAX_CONFIG_INTERVAL)
                )));
            }
        }

        let mut ids = HashSet::new();
        for feed in &self.feeds {
            if feed.feed_id.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("feed {} has an empty id", feed.url)));
            }
            if !ids.insert(feed.feed_id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate feed id: {}",
                    feed.feed_id
                )));
            }
            let url = url::Url::parse(&feed.url).map_err(|e| {
                ConfigError::Invalid(format!("feed {}: invalid url {}: {}", feed.feed_id, feed.url, e))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::Invalid(format!(
                    "feed {}: unsupported scheme {}",
                    feed.feed_id,
                    url.scheme()
                )));
            }
            if feed.poll_interval.is_zero() {
                return Err(ConfigError::Invalid(format!(
                    "feed {}: interval must be non-zero",
                    feed.feed_id
                )));
            }
            if feed.poll_interval > MAX_CONFIG_INTERVAL {
                return Err(ConfigError::Invalid(format!(
                    "feed {}: interval must not exceed {}",
                    feed.feed_id,
                    format_interval(MAX_CONFIG_INTERVAL)
                )));
            }
        }

        Ok(())
    }

    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    fn default_config_content() -> &'static str {
        r##"# freshet configuration
#
# Intervals accept "90s", "15m", "6h", "1d" or a plain number of seconds.

[daemon]
# state_path = "/var/lib/freshet/state.db"
workers = 4
fetch_timeout = "30s"
# Cap for the backoff of a failing feed
max_interval = "1d"
min_sleep = "1s"
shutdown_grace = "10s"
# Forget item ids that have not shown up in their feed for this long
retention = "30d"
max_body_bytes = 10485760

[logging]
level = "info"
# file = "/var/log/freshet.log"

[sink]
kind = "log"
# kind = "json_lines"
# path = "/var/lib/freshet/items.jsonl"

# [[feeds]]
# id = "rust-blog"
# url = "https://blog.rust-lang.org/feed.xml"
# interval = "15m"
"##
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
