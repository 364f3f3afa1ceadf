//! DDBR - Main entry point

use clap::Parser;
use ddbr_cli::Cli;
use ddbr_common::logging::{init_logging, LogConfig, LogLevel};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut log_config = LogConfig::default();
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    let log_config = match log_config.clone().with_env_overrides() {
        Ok(merged) => merged,
        Err(_) => log_config,
    };

    // The restore works without logging; never fail startup over it
    let _ = init_logging(&log_config);

    if let Err(e) = ddbr_cli::run(&cli).await {
        error!(error = %e, "Restore failed");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
