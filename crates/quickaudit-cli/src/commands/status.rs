use std::path::Path;

use quickaudit_core::models::EntityKind;
use serde::Serialize;

use crate::commands::common::LocalContext;
use crate::error::CliError;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatusReport {
    pub queued: usize,
    pub pending_rows: Vec<(EntityKind, usize)>,
}

pub async fn run_status(data_dir: &Path) -> Result<(), CliError> {
    let context = LocalContext::open(data_dir).await?;
    let report = collect_status(&context).await;
    context.close().await?;

    let report = report?;
    println!("Queued mutations: {}", report.queued);
    println!("Pending records:");
    for (kind, count) in &report.pending_rows {
        println!("  {:<10} {}", kind.table(), count);
    }
    Ok(())
}

pub async fn collect_status(context: &LocalContext) -> Result<StatusReport, CliError> {
    let mut pending_rows = Vec::with_capacity(EntityKind::ALL.len());
    for kind in EntityKind::ALL {
        let count = context.store.get_pending_sync(kind).await?.len();
        pending_rows.push((kind, count));
    }
    Ok(StatusReport {
        queued: context.signals.pending_count(),
        pending_rows,
    })
}
