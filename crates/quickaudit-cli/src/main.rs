//! QuickAudit CLI - capture audits offline and sync them from the terminal

mod cli;
mod commands;
mod config;
mod error;


use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::audit::run_audit;
use crate::commands::queue::run_queue;
use crate::commands::status::run_status;
use crate::commands::sync::run_sync;
use crate::commands::watch::run_watch;
use crate::config::{default_config_path, load_engine_config, resolve_data_dir, ENV_DATA_DIR};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quickaudit=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = resolve_data_dir(cli.data_dir, std::env::var(ENV_DATA_DIR).ok())?;
    let config_path = match cli.config {
        Some(path) => path,
        None => default_config_path()?,
    };

    match cli.command {
        Commands::Audit { command } => run_audit(command, &data_dir).await?,
        Commands::Queue { json } => run_queue(json, &data_dir).await?,
        Commands::Status => run_status(&data_dir).await?,
        Commands::Sync => {
            let config = load_engine_config(&config_path, |key| std::env::var(key).ok())?;
            run_sync(config, &data_dir).await?;
        }
        Commands::Watch => {
            let config = load_engine_config(&config_path, |key| std::env::var(key).ok())?;
            run_watch(config, &data_dir).await?;
        }
    }

    Ok(())
}
