//! cardswap - swap identity cards over Bluetooth Low Energy

use anyhow::Context;
use clap::Parser;
use tracing::info;

use cardswap_cli::{cli::Cli, commands::CommandDispatcher, config::AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    setup_logging(cli.verbose);

    // Load configuration
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    // Execute the command
    CommandDispatcher::execute(cli, config)
        .await
        .context("command failed")?;

    info!("cardswap exited successfully");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
