//! Entity-typed repository over the local store.
//!
//! Every local mutation goes through here: the row is written optimistically
//! and a matching mutation is queued for the sync driver.

use std::marker::PhantomData;

use serde_json::{json, Value};

use super::store::{Filters, LocalStore, Row};
use crate::error::{Error, Result};
use crate::models::{ChangeKind, Entity, NewRecord, Record, SyncStatus};
use crate::queue::{EntityRef, MutationType, QueueItem, SyncQueue};
use crate::state::SyncSignals;
use crate::util::now_iso8601;

/// Keys a patch may not change.
const IMMUTABLE_KEYS: [&str; 2] = ["id", "created_at"];

/// Typed CRUD for one entity kind.
pub struct Repository<T> {
    store: LocalStore,
    queue: SyncQueue,
    signals: SyncSignals,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            queue: self.queue.clone(),
            signals: self.signals.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Repository<T> {
    pub const fn new(store: LocalStore, queue: SyncQueue, signals: SyncSignals) -> Self {
        Self {
            store,
            queue,
            signals,
            _entity: PhantomData,
        }
    }

    /// Store a new record as pending and queue its `create`.
    pub async fn create(&self, draft: impl Into<NewRecord<T>>) -> Result<Record<T>> {
        let record = draft.into().into_record();
        let row = to_row(&record)?;

        let writes = self.queue.lock_writes().await;
        let stored = Record::<T>::from_row(self.store.insert(T::KIND, &row).await?)?;
        self.queue
            .enqueue(QueueItem::local(
                MutationType::Create,
                EntityRef::new(T::KIND, &stored.id),
                stored.to_wire()?,
            ))
            .await?;
        drop(writes);

        tracing::debug!("Created {} {}", T::KIND, stored.id);
        self.signals
            .notify_change(T::KIND, &stored.id, ChangeKind::Created);
        Ok(stored)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Record<T>>> {
        self.store
            .get_by_id(T::KIND, id)
            .await?
            .map(Record::from_row)
            .transpose()
    }

    /// Records matching every column filter, in storage order.
    pub async fn list(&self, filters: &Filters) -> Result<Vec<Record<T>>> {
        self.store
            .get_all(T::KIND, filters)
            .await?
            .into_iter()
            .map(Record::from_row)
            .collect()
    }

    /// Records with unconfirmed local mutations.
    pub async fn pending(&self) -> Result<Vec<Record<T>>> {
        self.store
            .get_pending_sync(T::KIND)
            .await?
            .into_iter()
            .map(Record::from_row)
            .collect()
    }

    /// Merge a JSON patch into a record, mark it pending and queue the full
    /// merged record as an `update`.
    pub async fn update(&self, id: &str, patch: Value) -> Result<Record<T>> {
        let Value::Object(patch) = patch else {
            return Err(Error::InvalidInput(
                "update patch must be a JSON object".to_string(),
            ));
        };

        let writes = self.queue.lock_writes().await;
        let current = self.store.get_by_id(T::KIND, id).await?.ok_or_else(|| Error::NotFound {
            table: T::KIND.table(),
            id: id.to_string(),
        })?;

        let explicit_sync_id = patch.contains_key("sync_id");
        let mut merged = current;
        for (key, value) in patch {
            if IMMUTABLE_KEYS.contains(&key.as_str()) {
                continue;
            }
            merged.insert(key, value);
        }
        if !explicit_sync_id {
            merged.insert("sync_id".to_string(), json!(uuid::Uuid::new_v4().to_string()));
        }
        merged.insert("updated_at".to_string(), json!(now_iso8601()));
        merged.insert(
            "sync_status".to_string(),
            json!(SyncStatus::PendingSync.as_str()),
        );

        // Reject patches that do not fit the entity before anything is written.
        let record = Record::<T>::from_row(merged)?;
        let row = to_row(&record)?;
        let stored = Record::<T>::from_row(self.store.update(T::KIND, id, &row).await?)?;

        self.queue
            .enqueue(QueueItem::local(
                MutationType::Update,
                EntityRef::new(T::KIND, id),
                stored.to_wire()?,
            ))
            .await?;
        drop(writes);

        tracing::debug!("Updated {} {}", T::KIND, id);
        self.signals.notify_change(T::KIND, id, ChangeKind::Updated);
        Ok(stored)
    }

    /// Queue a `delete` and remove the row immediately.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let writes = self.queue.lock_writes().await;
        let current = self.store.get_by_id(T::KIND, id).await?.ok_or_else(|| Error::NotFound {
            table: T::KIND.table(),
            id: id.to_string(),
        })?;

        self.queue
            .enqueue(QueueItem::local(
                MutationType::Delete,
                EntityRef::new(T::KIND, id),
                json!({ "id": id, "sync_id": current.get("sync_id") }),
            ))
            .await?;
        self.store.delete(T::KIND, id).await?;
        drop(writes);

        tracing::debug!("Deleted {} {}", T::KIND, id);
        self.signals.notify_change(T::KIND, id, ChangeKind::Deleted);
        Ok(())
    }
}

fn to_row<T: Entity>(record: &Record<T>) -> Result<Row> {
    match record.to_value()? {
        Value::Object(row) => Ok(row),
        other => Err(Error::InvalidInput(format!(
            "{} record did not serialize to an object: {other}",
            T::KIND
        ))),
    }
}
