//! Explicitly constructed sync engine.
//!
//! Owns the local store, the sync queue, the drain worker and the realtime
//! channel. Hosts build one with [`SyncEngine::initialize`] and tear it down
//! with [`SyncEngine::close`].

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::RemoteApi;
use crate::auth::CredentialProvider;
use crate::config::EngineConfig;
use crate::db::{LocalStore, Repository};
use crate::error::{Error, Result};
use crate::models::{Entity, EntityKind};
use crate::network::NetworkMonitor;
use crate::queue::{EntityRef, MutationType, QueueItem, SyncQueue};
use crate::realtime::{ChannelOptions, ChannelState, EventApplier, RealtimeChannel, Transport};
use crate::state::SyncSignals;
use crate::sync::{
    spawn_connectivity_listener, spawn_drain_worker, spawn_periodic_trigger, DrainReport,
    DrainTrigger, SyncDriver, TriggerReason,
};

pub const DATABASE_FILE: &str = "quickaudit.db";
pub const QUEUE_FILE: &str = "sync-queue.json";

/// Where the engine persists its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    /// `quickaudit.db` and `sync-queue.json` inside this directory
    Directory(PathBuf),
    /// Nothing survives the process
    InMemory,
}

/// The offline-first sync engine.
pub struct SyncEngine {
    store: LocalStore,
    queue: SyncQueue,
    signals: SyncSignals,
    network: NetworkMonitor,
    driver: Arc<SyncDriver>,
    trigger: DrainTrigger,
    channel: Option<RealtimeChannel>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("store", &self.store)
            .field("queue", &self.queue)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Open storage, reconcile the queue, start background triggers and
    /// request a first drain.
    ///
    /// A store that cannot be opened is fatal (`StorageInit`). A missing
    /// realtime URL only disables the realtime channel.
    pub async fn initialize(
        config: EngineConfig,
        location: StorageLocation,
        api: Arc<dyn RemoteApi>,
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        let signals = SyncSignals::new();
        let (store, queue) = match &location {
            StorageLocation::Directory(dir) => {
                let store = LocalStore::initialize(dir.join(DATABASE_FILE)).await?;
                let queue = SyncQueue::open(dir.join(QUEUE_FILE), signals.clone()).await?;
                (store, queue)
            }
            StorageLocation::InMemory => (
                LocalStore::open_in_memory().await?,
                SyncQueue::in_memory(signals.clone()),
            ),
        };

        let requeued = reconcile_orphans(&store, &queue).await?;
        if requeued > 0 {
            tracing::warn!("Re-queued {} pending records missing from the sync queue", requeued);
        }

        let network = NetworkMonitor::default();
        let driver = Arc::new(SyncDriver::new(
            store.clone(),
            queue.clone(),
            api,
            network.clone(),
            signals.clone(),
        ));
        let (trigger, requests) = DrainTrigger::channel();

        let channel = match ChannelOptions::from_config(&config) {
            Ok(options) => Some(RealtimeChannel::new(
                options,
                transport,
                credentials,
                EventApplier::new(store.clone(), queue.clone(), signals.clone(), trigger.clone()),
                signals.clone(),
            )),
            Err(error) => {
                tracing::info!("Realtime channel disabled: {}", error);
                None
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let tasks = vec![
            spawn_drain_worker(Arc::clone(&driver), requests, shutdown_rx.clone()),
            spawn_periodic_trigger(trigger.clone(), config.drain_interval(), shutdown_rx.clone()),
            spawn_connectivity_listener(&network, signals.clone(), trigger.clone(), shutdown_rx),
        ];

        // First pass runs the initial pull and drains whatever survived the
        // last session.
        trigger.request(TriggerReason::Manual);

        tracing::info!("Sync engine initialized ({} queued)", queue.len().await);
        Ok(Self {
            store,
            queue,
            signals,
            network,
            driver,
            trigger,
            channel,
            shutdown,
            tasks,
        })
    }

    /// Typed CRUD surface for one entity.
    pub fn repository<T: Entity>(&self) -> Repository<T> {
        Repository::new(self.store.clone(), self.queue.clone(), self.signals.clone())
    }

    /// Connect the realtime channel.
    pub async fn start_realtime(&self) -> Result<()> {
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| Error::Config("realtime_url is not configured".to_string()))?;
        channel.initialize().await
    }

    pub fn realtime(&self) -> Option<&RealtimeChannel> {
        self.channel.as_ref()
    }

    pub fn realtime_state(&self) -> Option<ChannelState> {
        self.channel.as_ref().map(RealtimeChannel::state)
    }

    /// Ask the background worker for a drain without waiting.
    pub fn request_sync(&self) {
        self.trigger.request(TriggerReason::Manual);
    }

    /// Run one drain pass now, after any pass already in flight.
    ///
    /// Attempts the initial pull first if it has not completed yet.
    pub async fn drain(&self) -> DrainReport {
        if let Err(error) = self.driver.initial_pull().await {
            tracing::warn!("Initial pull failed: {}", error);
        }
        self.driver.drain_after_current().await
    }

    pub const fn signals(&self) -> &SyncSignals {
        &self.signals
    }

    pub const fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub const fn queue(&self) -> &SyncQueue {
        &self.queue
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Stop background tasks, close the channel and the store.
    pub async fn close(self) -> Result<()> {
        self.shutdown.send_replace(true);
        for task in self.tasks {
            if let Err(error) = task.await {
                tracing::warn!("Background task failed: {}", error);
            }
        }
        if let Some(channel) = &self.channel {
            channel.close().await;
        }
        self.store.close().await?;
        tracing::info!("Sync engine closed");
        Ok(())
    }
}

/// Queue a create for every pending row the queue no longer references.
///
/// Happens when the queue file was lost or quarantined while the database
/// survived. The row's `sync_id` travels with the payload so the remote can
/// de-duplicate a create it already applied.
async fn reconcile_orphans(store: &LocalStore, queue: &SyncQueue) -> Result<usize> {
    let mut requeued = 0;
    for kind in EntityKind::ALL {
        for mut row in store.get_pending_sync(kind).await? {
            let Some(id) = row.get("id").and_then(|id| id.as_str()).map(str::to_string) else {
                continue;
            };
            if queue.references(kind, &id).await {
                continue;
            }
            row.remove("sync_status");
            row.retain(|_, value| !value.is_null());
            tracing::debug!("Re-queueing orphaned {} {}", kind, id);
            queue
                .enqueue(QueueItem::local(
                    MutationType::Create,
                    EntityRef::new(kind, id),
                    row.into(),
                ))
                .await?;
            requeued += 1;
        }
    }
    Ok(requeued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticCredentials;
    use crate::db::Filters;
    use crate::models::{Audit, SyncStatus};
    use crate::network::Connectivity;
    use crate::state::SyncState;
    use crate::test_support::{MockRemoteApi, MockTransport, RemoteCall};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    async fn engine(
        location: StorageLocation,
        api: Arc<MockRemoteApi>,
        config: EngineConfig,
    ) -> SyncEngine {
        SyncEngine::initialize(
            config,
            location,
            api,
            Arc::new(StaticCredentials::new(Some("token".to_string()))),
            Arc::new(MockTransport::new()),
        )
        .await
        .unwrap()
    }

    fn audit(title: &str) -> Audit {
        Audit::new(title, "tpl-1", "Warehouse", "user-1")
    }

    #[tokio::test]
    async fn offline_create_syncs_after_reconnect() {
        let api = Arc::new(MockRemoteApi::new());
        let engine = engine(StorageLocation::InMemory, api.clone(), EngineConfig::default()).await;
        engine.network().set(Connectivity::Offline);

        let created = engine.repository::<Audit>().create(audit("Dock")).await.unwrap();
        assert_eq!(created.sync_status, SyncStatus::PendingSync);
        assert_eq!(engine.signals().pending_count(), 1);

        let report = engine.drain().await;
        assert_eq!(report.remaining, 1);
        assert_eq!(engine.signals().state(), SyncState::Offline);

        let mut state = engine.signals().subscribe_state();
        engine.network().set(Connectivity::Online);
        state.wait_for(|state| *state == SyncState::Synced).await.unwrap();
        assert_eq!(engine.signals().pending_count(), 0);

        let row = engine
            .repository::<Audit>()
            .get(&created.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.sync_status, SyncStatus::Synced);
        assert!(api.record(&format!("/audits/{}", created.id)).is_some());
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn lost_queue_is_reconciled_from_pending_rows() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(MockRemoteApi::new());
        let location = StorageLocation::Directory(dir.path().to_path_buf());

        let first = engine(location.clone(), api.clone(), EngineConfig::default()).await;
        first.network().set(Connectivity::Offline);
        let created = first.repository::<Audit>().create(audit("Yard")).await.unwrap();
        first.close().await.unwrap();

        std::fs::remove_file(dir.path().join(QUEUE_FILE)).unwrap();

        let second = engine(location, api.clone(), EngineConfig::default()).await;
        let items = second.queue().items().await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].mutation, MutationType::Create);
        assert_eq!(items[0].payload["sync_id"], created.sync_id.as_str());
        assert!(items[0].payload.get("sync_status").is_none());

        assert!(second.drain().await.is_complete());
        let pending = second.repository::<Audit>().pending().await.unwrap();
        assert!(pending.is_empty());
        second.close().await.unwrap();
    }

    #[tokio::test]
    async fn startup_drains_queue_left_by_previous_session() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(MockRemoteApi::new());
        let location = StorageLocation::Directory(dir.path().to_path_buf());

        let first = engine(location.clone(), api.clone(), EngineConfig::default()).await;
        first.network().set(Connectivity::Offline);
        let created = first.repository::<Audit>().create(audit("Loft")).await.unwrap();
        first.close().await.unwrap();
        assert!(api.record(&format!("/audits/{}", created.id)).is_none());

        let second = engine(location, api.clone(), EngineConfig::default()).await;
        let mut pending = second.signals().subscribe_pending();
        pending.wait_for(|count| *count == 0).await.unwrap();

        let row = second
            .repository::<Audit>()
            .get(&created.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.sync_status, SyncStatus::Synced);
        assert!(api.record(&format!("/audits/{}", created.id)).is_some());
        second.close().await.unwrap();
    }

    #[tokio::test]
    async fn initial_pull_runs_once_per_database() {
        let dir = TempDir::new().unwrap();
        let api = Arc::new(MockRemoteApi::new());
        api.put_record(
            "/audits/r1",
            serde_json::json!({
                "id": "r1",
                "title": "Remote",
                "template": "tpl-1",
                "location": "HQ",
                "auditor": "user-2",
                "status": "approved",
            }),
        );
        let location = StorageLocation::Directory(dir.path().to_path_buf());
        let list_calls = || {
            api.calls()
                .iter()
                .filter(|call| matches!(call, RemoteCall::List(_)))
                .count()
        };

        let first = engine(location.clone(), api.clone(), EngineConfig::default()).await;
        assert!(first.drain().await.is_complete());
        let pulled = first.repository::<Audit>().get("r1").await.unwrap().unwrap();
        assert_eq!(pulled.sync_status, SyncStatus::Synced);
        assert_eq!(list_calls(), EntityKind::ALL.len());
        first.close().await.unwrap();

        let second = engine(location, api.clone(), EngineConfig::default()).await;
        assert!(second.drain().await.is_complete());
        assert_eq!(list_calls(), EntityKind::ALL.len());
        second.close().await.unwrap();
    }

    #[tokio::test]
    async fn realtime_requires_configured_url() {
        let api = Arc::new(MockRemoteApi::new());
        let engine = engine(StorageLocation::InMemory, api, EngineConfig::default()).await;
        assert!(engine.realtime_state().is_none());
        assert!(matches!(engine.start_realtime().await, Err(Error::Config(_))));
        engine.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_releases_the_store() {
        let api = Arc::new(MockRemoteApi::new());
        let engine = engine(StorageLocation::InMemory, api, EngineConfig::default()).await;
        let store = engine.store().clone();
        engine.close().await.unwrap();

        let result = store.get_all(EntityKind::Audit, &Filters::new()).await;
        assert!(matches!(result, Err(Error::StoreClosed)));
    }
}
