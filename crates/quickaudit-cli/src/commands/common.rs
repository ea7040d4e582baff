use std::path::Path;
use std::sync::Arc;

use quickaudit_core::api::HttpRemoteApi;
use quickaudit_core::auth::StaticCredentials;
use quickaudit_core::config::EngineConfig;
use quickaudit_core::db::{LocalStore, Repository};
use quickaudit_core::engine::{DATABASE_FILE, QUEUE_FILE};
use quickaudit_core::models::Entity;
use quickaudit_core::queue::SyncQueue;
use quickaudit_core::realtime::WebSocketTransport;
use quickaudit_core::state::SyncSignals;
use quickaudit_core::{StorageLocation, SyncEngine};

use crate::config::token_from_env;
use crate::error::CliError;

/// Store and queue without background tasks, for one-shot local commands.
pub struct LocalContext {
    pub store: LocalStore,
    pub queue: SyncQueue,
    pub signals: SyncSignals,
}

impl LocalContext {
    pub async fn open(data_dir: &Path) -> Result<Self, CliError> {
        let signals = SyncSignals::new();
        let store = LocalStore::initialize(data_dir.join(DATABASE_FILE)).await?;
        let queue = SyncQueue::open(data_dir.join(QUEUE_FILE), signals.clone()).await?;
        Ok(Self {
            store,
            queue,
            signals,
        })
    }

    pub fn repository<T: Entity>(&self) -> Repository<T> {
        Repository::new(
            self.store.clone(),
            self.queue.clone(),
            self.signals.clone(),
        )
    }

    pub async fn close(self) -> Result<(), CliError> {
        self.store.close().await?;
        Ok(())
    }
}

/// Full engine against the configured HTTP API.
pub async fn open_engine(config: EngineConfig, data_dir: &Path) -> Result<SyncEngine, CliError> {
    if config.api_base_url.is_none() {
        return Err(CliError::SyncNotConfigured);
    }
    let credentials = Arc::new(StaticCredentials::new(token_from_env()));
    let api = HttpRemoteApi::new(&config, credentials.clone())?;
    let transport = WebSocketTransport::new(config.request_timeout());
    let engine = SyncEngine::initialize(
        config,
        StorageLocation::Directory(data_dir.to_path_buf()),
        Arc::new(api),
        credentials,
        Arc::new(transport),
    )
    .await?;
    Ok(engine)
}

pub fn normalize_id(raw: &str) -> Result<String, CliError> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(CliError::EmptyAuditId);
    }
    Ok(id.to_string())
}

/// Shorten an id for table output.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
