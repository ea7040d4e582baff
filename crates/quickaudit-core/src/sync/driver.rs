//! Sequential replay of the sync queue against the remote API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::remote::{pull_remote_record, unwrap_envelope, upsert_remote_record};
use crate::api::RemoteApi;
use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::{ChangeKind, EntityKind, SyncStatus};
use crate::network::NetworkMonitor;
use crate::queue::{MutationOrigin, MutationType, QueueItem, SyncQueue};
use crate::state::{SyncSignals, SyncState};
use crate::util::now_iso8601;

/// `sync_meta` key recording when the initial pull completed.
const INITIAL_PULL_KEY: &str = "initial_pull_completed_at";

/// How a drain pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The queue was emptied
    Completed,
    /// An item failed; it and everything after it stay queued
    Stopped { item_id: String, error: String },
    /// Skipped because the device is offline
    Offline,
    /// Another drain was already running
    Coalesced,
}

/// Diagnostics for one drain pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Items confirmed and removed during this pass
    pub synced: usize,
    /// Items still queued afterwards
    pub remaining: usize,
    pub outcome: DrainOutcome,
}

impl DrainReport {
    pub const fn is_complete(&self) -> bool {
        matches!(self.outcome, DrainOutcome::Completed)
    }
}

/// Drains the queue one item at a time, oldest first.
pub struct SyncDriver {
    store: LocalStore,
    queue: SyncQueue,
    api: Arc<dyn RemoteApi>,
    network: NetworkMonitor,
    signals: SyncSignals,
    running: Mutex<()>,
    pulling: Mutex<()>,
    pulled: AtomicBool,
}

impl SyncDriver {
    pub fn new(
        store: LocalStore,
        queue: SyncQueue,
        api: Arc<dyn RemoteApi>,
        network: NetworkMonitor,
        signals: SyncSignals,
    ) -> Self {
        Self {
            store,
            queue,
            api,
            network,
            signals,
            running: Mutex::new(()),
            pulling: Mutex::new(()),
            pulled: AtomicBool::new(false),
        }
    }

    /// Run one drain pass, waiting for an in-flight pass to finish instead
    /// of coalescing with it.
    pub async fn drain_after_current(&self) -> DrainReport {
        loop {
            drop(self.running.lock().await);
            let report = self.drain().await;
            if report.outcome != DrainOutcome::Coalesced {
                return report;
            }
        }
    }

    /// Run one drain pass.
    ///
    /// Stops at the first failing item without calling the remote for any
    /// later item. Errors are logged and reported, never returned.
    pub async fn drain(&self) -> DrainReport {
        let Ok(_running) = self.running.try_lock() else {
            tracing::debug!("Drain already in progress");
            return DrainReport {
                synced: 0,
                remaining: self.queue.len().await,
                outcome: DrainOutcome::Coalesced,
            };
        };

        if !self.network.is_online() {
            tracing::debug!("Offline; skipping drain");
            self.signals.set_state(SyncState::Offline);
            return DrainReport {
                synced: 0,
                remaining: self.queue.len().await,
                outcome: DrainOutcome::Offline,
            };
        }

        self.signals.set_state(SyncState::Syncing);
        let mut synced = 0;
        let outcome = loop {
            let Some(item) = self.queue.front().await else {
                break DrainOutcome::Completed;
            };

            tracing::debug!(
                "Replaying {} {} ({:?}, {})",
                item.mutation,
                item.endpoint,
                item.origin,
                item.id
            );
            let result = match self.replay(&item).await {
                Ok(()) => self.confirm(&item).await,
                Err(error) => Err(error),
            };
            if let Err(error) = result {
                tracing::warn!(
                    "Sync stopped at {} {} ({}): {}",
                    item.mutation,
                    item.endpoint,
                    item.id,
                    error
                );
                break DrainOutcome::Stopped {
                    item_id: item.id,
                    error: error.to_string(),
                };
            }
            synced += 1;
        };

        let remaining = self.queue.len().await;
        self.signals.set_state(if remaining == 0 {
            SyncState::Synced
        } else {
            SyncState::Pending
        });
        if synced > 0 {
            tracing::info!("Synced {synced} queued mutations, {remaining} remaining");
        }

        DrainReport {
            synced,
            remaining,
            outcome,
        }
    }

    async fn replay(&self, item: &QueueItem) -> Result<()> {
        match (item.origin, item.mutation) {
            (MutationOrigin::Local, MutationType::Create) => {
                self.api.create(&item.endpoint, &item.payload).await?;
            }
            (MutationOrigin::Local, MutationType::Update) => {
                self.api.update(&item.endpoint, &item.payload).await?;
            }
            (MutationOrigin::Local, MutationType::Delete) => {
                self.api.delete(&item.endpoint).await?;
            }
            (MutationOrigin::Remote, _) => self.refetch(item).await?,
        }
        Ok(())
    }

    /// Materialize the remote's current view of a fallback item's entity.
    async fn refetch(&self, item: &QueueItem) -> Result<()> {
        let Some(entity) = &item.entity else {
            return Err(Error::InvalidInput(format!(
                "queued item {} has no entity reference",
                item.id
            )));
        };

        let record = if item.mutation == MutationType::Delete {
            None
        } else {
            self.api.fetch(&item.endpoint).await?
        };

        if let Some(record) = record {
            let stored = upsert_remote_record(
                &self.store,
                &self.queue,
                entity.kind,
                unwrap_envelope(entity.kind, record),
            )
            .await;
            match stored {
                Ok(_) => self
                    .signals
                    .notify_change(entity.kind, &entity.id, ChangeKind::Updated),
                // Unusable remote records are dropped along with the item.
                Err(Error::ApplyConflict(reason)) => tracing::error!(
                    "Dropping remote {} {}: {}",
                    entity.kind,
                    entity.id,
                    reason
                ),
                Err(error) => return Err(error),
            }
        } else if self.store.delete(entity.kind, &entity.id).await? {
            self.signals
                .notify_change(entity.kind, &entity.id, ChangeKind::Deleted);
        }
        Ok(())
    }

    /// Settle a replayed item's row and remove the item.
    ///
    /// The row is marked synced before the item is removed, so a failure in
    /// between never leaves a pending row without a queued item.
    async fn confirm(&self, item: &QueueItem) -> Result<()> {
        let _writes = self.queue.lock_writes().await;
        let mut settled = None;
        if let Some(entity) = &item.entity {
            if item.mutation != MutationType::Delete
                && !self
                    .queue
                    .references_except(entity.kind, &entity.id, &item.id)
                    .await
            {
                self.store.mark_synced(entity.kind, &entity.id).await?;
                settled = Some(entity);
            }
        }

        if let Err(error) = self.queue.remove(&item.id).await {
            if let Some(entity) = settled {
                if let Err(revert) = self
                    .store
                    .set_sync_status(entity.kind, &entity.id, SyncStatus::PendingSync)
                    .await
                {
                    tracing::error!(
                        "Could not restore pending status of {} {}: {}",
                        entity.kind,
                        entity.id,
                        revert
                    );
                }
            }
            return Err(error);
        }
        self.signals.touch_last_sync();
        Ok(())
    }

    /// Populate the store from full remote listings, once per database.
    ///
    /// Rows with queued local mutations are left alone. The pull is retried
    /// on later calls until every listing succeeds while online.
    pub async fn initial_pull(&self) -> Result<usize> {
        if self.pulled.load(Ordering::Acquire) {
            return Ok(0);
        }
        let _pulling = self.pulling.lock().await;
        if self.pulled.load(Ordering::Acquire) {
            return Ok(0);
        }
        if self.store.get_meta(INITIAL_PULL_KEY).await?.is_some() {
            self.pulled.store(true, Ordering::Release);
            return Ok(0);
        }
        if !self.network.is_online() {
            tracing::debug!("Offline; deferring initial pull");
            return Ok(0);
        }

        let mut pulled = 0;
        let mut complete = true;
        for kind in EntityKind::ALL {
            let records = match self.api.list(kind.endpoint()).await {
                Ok(records) => records,
                Err(error) => {
                    tracing::warn!("Initial pull of {} failed: {}", kind.endpoint(), error);
                    complete = false;
                    continue;
                }
            };
            for record in records {
                match pull_remote_record(&self.store, &self.queue, kind, record).await {
                    Ok(Some(row)) => {
                        if let Some(id) = row.get("id").and_then(|id| id.as_str()) {
                            self.signals.notify_change(kind, id, ChangeKind::Updated);
                        }
                        pulled += 1;
                    }
                    Ok(None) => {}
                    Err(Error::ApplyConflict(reason)) => {
                        tracing::warn!("Skipping remote {kind}: {reason}");
                    }
                    Err(error) => return Err(error),
                }
            }
        }

        if complete {
            self.store
                .set_meta(INITIAL_PULL_KEY, &now_iso8601())
                .await?;
            self.pulled.store(true, Ordering::Release);
            tracing::info!("Initial pull stored {pulled} remote records");
        }
        Ok(pulled)
    }
}
