//! Applying realtime events to the local store.

use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::ChangeKind;
use crate::queue::{EntityRef, MutationType, QueueItem, SyncQueue};
use crate::state::SyncSignals;
use crate::sync::remote::{update_from_remote, upsert_remote_record};
use crate::sync::{DrainTrigger, TriggerReason};

use super::event::RealtimeEvent;

/// Writes inbound events locally, falling back to the sync queue when an
/// event cannot be applied.
#[derive(Debug, Clone)]
pub struct EventApplier {
    store: LocalStore,
    queue: SyncQueue,
    signals: SyncSignals,
    trigger: DrainTrigger,
}

impl EventApplier {
    pub const fn new(
        store: LocalStore,
        queue: SyncQueue,
        signals: SyncSignals,
        trigger: DrainTrigger,
    ) -> Self {
        Self {
            store,
            queue,
            signals,
            trigger,
        }
    }

    /// Parse and apply one raw message. Unusable messages are logged and
    /// dropped.
    pub async fn handle_message(&self, text: &str) {
        match RealtimeEvent::parse(text) {
            Ok(event) => {
                if let Err(error) = self.apply(event).await {
                    tracing::debug!("Realtime event deferred to the sync queue: {}", error);
                }
            }
            Err(error) => tracing::warn!("Ignoring realtime message: {}", error),
        }
    }

    /// Apply an event; on failure queue a refetch and request a drain.
    pub async fn apply(&self, event: RealtimeEvent) -> Result<()> {
        self.signals.increment_pending();
        let result = self.write(&event).await;
        self.signals.decrement_pending();

        match result {
            Ok(id) => {
                tracing::debug!("Applied realtime {} for {}", event.name(), id);
                self.signals.touch_last_sync();
                self.signals.notify_change(event.kind, id, event.change);
                Ok(())
            }
            Err(error) => {
                tracing::warn!("Could not apply realtime {}: {}", event.name(), error);
                self.fallback(&event).await;
                Err(error)
            }
        }
    }

    async fn write(&self, event: &RealtimeEvent) -> Result<String> {
        let id = event.record_id().ok_or_else(|| {
            Error::ApplyConflict(format!("{} payload has no id", event.name()))
        })?;
        match event.change {
            ChangeKind::Created => {
                upsert_remote_record(&self.store, &self.queue, event.kind, event.record.clone())
                    .await?;
            }
            ChangeKind::Updated => {
                update_from_remote(&self.store, &self.queue, event.kind, event.record.clone())
                    .await?;
            }
            ChangeKind::Deleted => {
                self.store.delete(event.kind, &id).await?;
            }
        }
        Ok(id)
    }

    async fn fallback(&self, event: &RealtimeEvent) {
        let Some(id) = event.record_id() else {
            tracing::error!("Dropping realtime {} without an id", event.name());
            return;
        };
        let mutation = match event.change {
            ChangeKind::Created => MutationType::Create,
            ChangeKind::Updated => MutationType::Update,
            ChangeKind::Deleted => MutationType::Delete,
        };
        let item = QueueItem::remote(
            mutation,
            EntityRef::new(event.kind, id),
            event.record.clone(),
        );
        if let Err(error) = self.queue.enqueue(item).await {
            tracing::error!("Could not queue realtime fallback: {}", error);
            return;
        }
        self.trigger.request(TriggerReason::RealtimeFallback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::db::{Filters, Repository};
    use crate::models::{Audit, EntityKind, SyncStatus};
    use crate::network::NetworkMonitor;
    use crate::queue::MutationOrigin;
    use crate::sync::SyncDriver;
    use crate::test_support::MockRemoteApi;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Harness {
        applier: EventApplier,
        store: LocalStore,
        queue: SyncQueue,
        signals: SyncSignals,
        requests: mpsc::Receiver<TriggerReason>,
    }

    async fn harness() -> Harness {
        let signals = SyncSignals::new();
        let store = LocalStore::open_in_memory().await.unwrap();
        let queue = SyncQueue::in_memory(signals.clone());
        let (trigger, requests) = DrainTrigger::channel();
        Harness {
            applier: EventApplier::new(store.clone(), queue.clone(), signals.clone(), trigger),
            store,
            queue,
            signals,
            requests,
        }
    }

    fn audit_message(change: &str, id: &str, status: &str) -> String {
        json!({
            "type": format!("audit.{change}"),
            "data": {"audit": {
                "id": id,
                "title": "Pushed",
                "template": "tpl-1",
                "location": "HQ",
                "auditor": "user-2",
                "status": status,
            }}
        })
        .to_string()
    }

    #[tokio::test]
    async fn created_event_upserts_synced_row() {
        let h = harness().await;
        let mut changes = h.signals.subscribe_changes();

        h.applier
            .handle_message(&audit_message("created", "a1", "draft"))
            .await;

        let row = h.store.get_by_id(EntityKind::Audit, "a1").await.unwrap().unwrap();
        assert_eq!(row["sync_status"], SyncStatus::Synced.as_str());
        assert_eq!(row["title"], "Pushed");
        assert_eq!(h.signals.pending_count(), 0);
        assert!(h.signals.last_sync().is_some());
        assert_eq!(changes.recv().await.unwrap().change, ChangeKind::Created);
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn updated_and_deleted_events_modify_existing_row() {
        let h = harness().await;
        h.applier
            .handle_message(&audit_message("created", "a1", "draft"))
            .await;
        h.applier
            .handle_message(r#"{"type":"audit.updated","data":{"id":"a1","status":"approved"}}"#)
            .await;

        let row = h.store.get_by_id(EntityKind::Audit, "a1").await.unwrap().unwrap();
        assert_eq!(row["status"], "approved");
        assert_eq!(row["title"], "Pushed");

        h.applier
            .handle_message(r#"{"type":"audit.deleted","data":{"id":"a1"}}"#)
            .await;
        assert_eq!(h.store.get_by_id(EntityKind::Audit, "a1").await.unwrap(), None);
        assert!(h.queue.is_empty().await);
    }

    #[tokio::test]
    async fn unknown_messages_are_ignored() {
        let h = harness().await;
        h.applier.handle_message("{").await;
        h.applier
            .handle_message(r#"{"type":"invoice.created","data":{"id":"i1"}}"#)
            .await;
        assert!(h.queue.is_empty().await);
        assert_eq!(h.signals.pending_count(), 0);
    }

    #[tokio::test]
    async fn update_for_absent_entity_falls_back_and_drain_materializes_it() {
        let mut h = harness().await;
        let api = Arc::new(MockRemoteApi::new());
        api.put_record(
            "/audits/a9",
            json!({
                "id": "a9",
                "title": "Authoritative",
                "template": "tpl-1",
                "location": "HQ",
                "auditor": "user-2",
                "status": "completed",
            }),
        );

        let event = RealtimeEvent::parse(&audit_message("updated", "a9", "completed")).unwrap();
        let result = h.applier.apply(event).await;
        assert!(matches!(result, Err(Error::ApplyConflict(_))));

        let queued = h.queue.items().await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].origin, MutationOrigin::Remote);
        assert_eq!(queued[0].mutation, MutationType::Update);
        assert_eq!(queued[0].endpoint, "/audits/a9");
        assert_eq!(h.signals.pending_count(), 1);
        assert_eq!(h.requests.recv().await, Some(TriggerReason::RealtimeFallback));

        let driver = SyncDriver::new(
            h.store.clone(),
            h.queue.clone(),
            api,
            NetworkMonitor::default(),
            h.signals.clone(),
        );
        assert!(driver.drain().await.is_complete());

        let row = h.store.get_by_id(EntityKind::Audit, "a9").await.unwrap().unwrap();
        assert_eq!(row["title"], "Authoritative");
        assert_eq!(row["sync_status"], "synced");
        assert_eq!(h.signals.pending_count(), 0);
    }

    #[tokio::test]
    async fn pushed_update_keeps_local_pending_state() {
        let h = harness().await;
        h.applier
            .handle_message(&audit_message("created", "a1", "draft"))
            .await;
        h.queue
            .enqueue(QueueItem::local(
                MutationType::Update,
                EntityRef::new(EntityKind::Audit, "a1"),
                json!({"id": "a1"}),
            ))
            .await
            .unwrap();

        h.applier
            .handle_message(r#"{"type":"audit.updated","data":{"id":"a1","notes":"remote"}}"#)
            .await;
        let row = h.store.get_by_id(EntityKind::Audit, "a1").await.unwrap().unwrap();
        assert_eq!(row["sync_status"], "pending_sync");
        assert_eq!(row["notes"], "remote");
    }

    #[tokio::test]
    async fn created_event_with_unknown_status_is_not_stored() {
        let mut h = harness().await;
        let repo: Repository<Audit> =
            Repository::new(h.store.clone(), h.queue.clone(), h.signals.clone());
        repo.create(Audit::new("Local", "tpl-1", "HQ", "user-1"))
            .await
            .unwrap();

        let event =
            RealtimeEvent::parse(&audit_message("created", "a1", "pending_review")).unwrap();
        let result = h.applier.apply(event).await;
        assert!(matches!(result, Err(Error::ApplyConflict(_))));

        assert_eq!(h.store.get_by_id(EntityKind::Audit, "a1").await.unwrap(), None);
        assert_eq!(repo.list(&Filters::new()).await.unwrap().len(), 1);

        let queued = h.queue.items().await;
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[1].origin, MutationOrigin::Remote);
        assert_eq!(queued[1].endpoint, "/audits/a1");
        assert_eq!(h.requests.recv().await, Some(TriggerReason::RealtimeFallback));
    }

    #[tokio::test]
    async fn updated_event_that_breaks_the_record_leaves_row_unchanged() {
        let h = harness().await;
        h.applier
            .handle_message(&audit_message("created", "a1", "draft"))
            .await;
        h.applier
            .handle_message(
                r#"{"type":"audit.updated","data":{"id":"a1","status":"pending_review"}}"#,
            )
            .await;

        let row = h.store.get_by_id(EntityKind::Audit, "a1").await.unwrap().unwrap();
        assert_eq!(row["status"], "draft");
        let repo: Repository<Audit> =
            Repository::new(h.store.clone(), h.queue.clone(), h.signals.clone());
        assert_eq!(repo.list(&Filters::new()).await.unwrap().len(), 1);
        assert_eq!(h.queue.items().await[0].origin, MutationOrigin::Remote);
    }
}
