pub mod commands;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::parse_interval;

#[derive(Parser)]
#[command(name = "freshet")]
#[command(about = "Polls RSS/Atom feeds and emits each new item once", long_about = None)]
pub struct Cli {
    /// Path to the config file (default: ~/.config/freshet/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the polling daemon in the foreground
    Run,
    /// Poll every configured feed once and exit
    Check,
    /// Show schedule state and seen-item counts per feed
    Status,
    /// Forget seen item ids that have not been confirmed recently
    Prune {
        /// Age cutoff (e.g., "30d", "12h"); defaults to daemon.retention
        #[arg(long, value_parser = parse_interval)]
        older_than: Option<Duration>,
    },
}
