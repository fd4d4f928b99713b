use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use freshet::app::AppContext;
use freshet::cli::{commands, Cli, Commands};
use freshet::config::Config;
use freshet::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    logging::init(&config.logging).context("Failed to initialize logging")?;

    let state_path = config.state_path()?;
    let ctx = AppContext::new(config)
        .with_context(|| format!("Failed to open state at {}", state_path.display()))?;

    match cli.command {
        Commands::Run => {
            commands::run_daemon(Arc::new(ctx)).await?;
        }
        Commands::Check => {
            commands::check_feeds(Arc::new(ctx)).await?;
        }
        Commands::Status => {
            commands::show_status(&ctx)?;
        }
        Commands::Prune { older_than } => {
            commands::prune_seen(&ctx, older_than)?;
        }
    }

    Ok(())
}
