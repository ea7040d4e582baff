//! Durable queue of pending remote mutations.
//!
//! The queue lives in its own JSON file next to the store so either can be
//! recovered without the other. Every change is written through before the
//! call returns.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::Result;
use crate::models::EntityKind;
use crate::state::SyncSignals;
use crate::util::unix_millis_now;

/// Remote operation a queued item replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationType {
    Create,
    Update,
    Delete,
}

impl MutationType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for MutationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a queued item came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MutationOrigin {
    /// Repository write, replayed against the remote
    #[default]
    Local,
    /// Realtime fallback, replayed by refetching from the remote
    Remote,
}

/// Local row a queued item concerns.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// One persisted pending mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    #[serde(rename = "type")]
    pub mutation: MutationType,
    pub endpoint: String,
    #[serde(default)]
    pub payload: Value,
    /// Enqueue time in Unix milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityRef>,
    #[serde(default)]
    pub origin: MutationOrigin,
}

impl QueueItem {
    /// Build a repository mutation for `entity`.
    pub fn local(mutation: MutationType, entity: EntityRef, payload: Value) -> Self {
        Self::build(mutation, entity, payload, MutationOrigin::Local)
    }

    /// Build a realtime fallback for `entity`.
    pub fn remote(mutation: MutationType, entity: EntityRef, payload: Value) -> Self {
        Self::build(mutation, entity, payload, MutationOrigin::Remote)
    }

    fn build(
        mutation: MutationType,
        entity: EntityRef,
        payload: Value,
        origin: MutationOrigin,
    ) -> Self {
        let endpoint = match (mutation, origin) {
            (MutationType::Create, MutationOrigin::Local) => entity.kind.endpoint().to_string(),
            _ => entity.kind.item_endpoint(&entity.id),
        };
        let payload = if mutation == MutationType::Delete {
            Value::Null
        } else {
            payload
        };
        Self {
            id: Uuid::new_v4().to_string(),
            mutation,
            endpoint,
            payload,
            timestamp: unix_millis_now(),
            entity: Some(entity),
            origin,
        }
    }

    pub fn references(&self, kind: EntityKind, id: &str) -> bool {
        self.entity
            .as_ref()
            .is_some_and(|entity| entity.kind == kind && entity.id == id)
    }
}

struct QueueState {
    items: VecDeque<QueueItem>,
    path: Option<PathBuf>,
}

/// Ordered, persistent list of pending mutations.
#[derive(Clone)]
pub struct SyncQueue {
    state: Arc<Mutex<QueueState>>,
    writes: Arc<Mutex<()>>,
    signals: SyncSignals,
}

impl std::fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncQueue").finish_non_exhaustive()
    }
}

impl SyncQueue {
    /// Load the queue persisted at `path`; a missing file is an empty queue.
    ///
    /// A file that cannot be parsed is renamed to `<name>.corrupt-<ms>` and the
    /// queue starts empty.
    pub async fn open(path: impl Into<PathBuf>, signals: SyncSignals) -> Result<Self> {
        let path = path.into();
        let items = match tokio::fs::read(&path).await {
            Ok(raw) => match serde_json::from_slice::<Vec<QueueItem>>(&raw) {
                Ok(items) => items,
                Err(error) => {
                    tracing::warn!(
                        "Sync queue at {} is unreadable: {}. Starting with an empty queue.",
                        path.display(),
                        error
                    );
                    quarantine_corrupted_queue(&path).await?;
                    Vec::new()
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(error) => return Err(error.into()),
        };

        tracing::debug!("Loaded {} queued mutations from {}", items.len(), path.display());
        signals.set_pending(items.len());
        Ok(Self {
            state: Arc::new(Mutex::new(QueueState {
                items: items.into(),
                path: Some(path),
            })),
            writes: Arc::new(Mutex::new(())),
            signals,
        })
    }

    /// Non-persistent queue (primarily for tests).
    pub fn in_memory(signals: SyncSignals) -> Self {
        signals.set_pending(0);
        Self {
            state: Arc::new(Mutex::new(QueueState {
                items: VecDeque::new(),
                path: None,
            })),
            writes: Arc::new(Mutex::new(())),
            signals,
        }
    }

    /// Append an item and persist the queue.
    ///
    /// If the write fails the item is not kept in memory either, so the caller
    /// sees the error and the in-memory queue matches the file.
    pub async fn enqueue(&self, item: QueueItem) -> Result<()> {
        let mut state = self.state.lock().await;
        tracing::debug!(
            "Queueing {} {} ({})",
            item.mutation,
            item.endpoint,
            item.id
        );
        state.items.push_back(item);
        if let Err(error) = persist(&state).await {
            state.items.pop_back();
            return Err(error);
        }
        drop(state);
        self.signals.increment_pending();
        Ok(())
    }

    /// Oldest queued item.
    pub async fn front(&self) -> Option<QueueItem> {
        self.state.lock().await.items.front().cloned()
    }

    /// Remove a confirmed item by id; returns whether it was present.
    pub async fn remove(&self, item_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let Some(index) = state.items.iter().position(|item| item.id == item_id) else {
            return Ok(false);
        };
        let Some(removed) = state.items.remove(index) else {
            return Ok(false);
        };
        if let Err(error) = persist(&state).await {
            state.items.insert(index, removed);
            return Err(error);
        }
        drop(state);
        self.signals.decrement_pending();
        Ok(true)
    }

    /// Snapshot of all queued items in order.
    pub async fn items(&self) -> Vec<QueueItem> {
        self.state.lock().await.items.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.items.is_empty()
    }

    /// Whether any queued item concerns the given row.
    pub async fn references(&self, kind: EntityKind, id: &str) -> bool {
        self.state
            .lock()
            .await
            .items
            .iter()
            .any(|item| item.references(kind, id))
    }

    /// Like [`Self::references`], ignoring the item `item_id`.
    pub async fn references_except(&self, kind: EntityKind, id: &str, item_id: &str) -> bool {
        self.state
            .lock()
            .await
            .items
            .iter()
            .any(|item| item.id != item_id && item.references(kind, id))
    }

    /// Hold while writing a row together with the queue change that decides
    /// its sync status. `enqueue` and `remove` do not take this lock.
    pub(crate) async fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().await
    }

    pub async fn path(&self) -> Option<PathBuf> {
        self.state.lock().await.path.clone()
    }
}

async fn persist(state: &QueueState) -> Result<()> {
    let Some(path) = &state.path else {
        return Ok(());
    };
    let raw = serde_json::to_vec_pretty(&state.items)?;
    write_atomic(path, &raw).await
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    tokio::fs::write(&tmp_path, contents).await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

async fn quarantine_corrupted_queue(path: &Path) -> Result<()> {
    let file_name = path
        .file_name()
        .map_or_else(|| "sync-queue.json".into(), |name| name.to_string_lossy());
    let timestamp = chrono::Utc::now().timestamp_millis();
    let backup_path = path.with_file_name(format!("{file_name}.corrupt-{timestamp}"));
    tokio::fs::rename(path, &backup_path).await?;
    tracing::warn!(
        "Moved corrupted sync queue from {} to {}",
        path.display(),
        backup_path.display()
    );
    Ok(())
}
