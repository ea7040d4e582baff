use std::path::Path;

use quickaudit_core::config::EngineConfig;
use quickaudit_core::Error as CoreError;
use tokio::sync::broadcast::error::RecvError;

use crate::commands::common::open_engine;
use crate::error::CliError;

pub async fn run_watch(config: EngineConfig, data_dir: &Path) -> Result<(), CliError> {
    let engine = open_engine(config, data_dir).await?;

    match engine.start_realtime().await {
        Ok(()) => {}
        Err(CoreError::NotAuthenticated) => {
            tracing::warn!("No access token; set QUICKAUDIT_TOKEN to receive realtime updates");
        }
        Err(error) => tracing::warn!("Realtime disabled: {}", error),
    }

    let mut pending = engine.signals().subscribe_pending();
    let mut changes = engine.signals().subscribe_changes();
    println!("Watching; press Ctrl-C to stop.");

    let result = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => break signal.map_err(CliError::from),
            changed = pending.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                println!("Pending mutations: {}", *pending.borrow_and_update());
            }
            change = changes.recv() => match change {
                Ok(change) => println!("{} {} {}", change.kind, change.change.as_str(), change.id),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Skipped {} change notifications", skipped);
                }
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    engine.close().await?;
    result
}
