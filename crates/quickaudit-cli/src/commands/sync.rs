use std::path::Path;

use quickaudit_core::config::EngineConfig;
use quickaudit_core::sync::{DrainOutcome, DrainReport};

use crate::commands::common::open_engine;
use crate::error::CliError;

pub async fn run_sync(config: EngineConfig, data_dir: &Path) -> Result<(), CliError> {
    let engine = open_engine(config, data_dir).await?;
    let report = engine.drain().await;
    engine.close().await?;

    println!("{}", format_report(&report));
    Ok(())
}

pub fn format_report(report: &DrainReport) -> String {
    match &report.outcome {
        DrainOutcome::Completed => format!("Sync completed: {} mutations sent", report.synced),
        DrainOutcome::Stopped { item_id, error } => format!(
            "Sync stopped after {} mutations; {} remaining (item {}: {})",
            report.synced, report.remaining, item_id, error
        ),
        DrainOutcome::Offline => format!("Offline; {} mutations remaining", report.remaining),
        DrainOutcome::Coalesced => "Sync already in progress".to_string(),
    }
}
