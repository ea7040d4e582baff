use std::path::Path;

use chrono::DateTime;
use quickaudit_core::queue::{MutationOrigin, QueueItem};

use crate::commands::common::{short_id, LocalContext};
use crate::error::CliError;

pub async fn run_queue(as_json: bool, data_dir: &Path) -> Result<(), CliError> {
    let context = LocalContext::open(data_dir).await?;
    let items = context.queue.items().await;
    context.close().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    if items.is_empty() {
        println!("Sync queue is empty.");
        return Ok(());
    }
    for item in &items {
        println!("{}", format_queue_line(item));
    }
    Ok(())
}

pub fn format_queue_line(item: &QueueItem) -> String {
    let queued_at = DateTime::from_timestamp_millis(item.timestamp).map_or_else(
        || item.timestamp.to_string(),
        |time| time.format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    let origin = match item.origin {
        MutationOrigin::Local => "",
        MutationOrigin::Remote => " (refetch)",
    };
    format!(
        "{} {} {:<6} {}{}",
        short_id(&item.id),
        queued_at,
        item.mutation.as_str(),
        item.endpoint,
        origin
    )
}
