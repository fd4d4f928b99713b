//! Logging setup.

use std::fs::{self, OpenOptions};
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::app::Result;
use crate::config::LoggingConfig;

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// `RUST_LOG` directives when present, otherwise the configured level.
fn build_filter(level: &str, env_directives: Option<&str>) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(parse_level(level).into())
        .parse_lossy(env_directives.unwrap_or_default())
}

/// Install the global subscriber.
///
/// Output goes to stderr and, when `config.file` is set, is appended to
/// that file as well. A non-empty `RUST_LOG` replaces the configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let env_directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(&config.level, env_directives.as_deref());

    match config.file {
        Some(ref path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let file = Arc::new(OpenOptions::new().create(true).append(true).open(path)?);

            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr.and(file))
                        .with_ansi(false)
                        .with_target(false),
                )
                .with(filter)
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
                .with(filter)
                .init();
        }
    }

    Ok(())
}
