//! Writing authoritative remote records into the local store.

use serde_json::{json, Value};
use uuid::Uuid;

use crate::db::{retain_known_columns, stored_form, LocalStore, Row};
use crate::error::{Error, Result};
use crate::models::{
    Action, Audit, EntityKind, FileMeta, Finding, Record, SyncStatus, Template, User,
};
use crate::queue::SyncQueue;
use crate::util::now_iso8601;

/// Unwrap `{"<entity>": record}` envelopes, e.g. `{"audit": {...}}`.
pub(crate) fn unwrap_envelope(kind: EntityKind, value: Value) -> Value {
    match value {
        Value::Object(mut object)
            if object.len() == 1
                && object.get(kind.event_name()).is_some_and(Value::is_object) =>
        {
            object.remove(kind.event_name()).unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Turn a remote record into a storable row.
///
/// Keys the local schema does not know are dropped. A row with queued local
/// mutations stays `pending_sync`.
pub(crate) async fn remote_row(
    queue: &SyncQueue,
    kind: EntityKind,
    record: Value,
) -> Result<(String, Row)> {
    let Value::Object(mut row) = unwrap_envelope(kind, record) else {
        return Err(Error::ApplyConflict(format!(
            "{kind} payload is not a JSON object"
        )));
    };

    let dropped = retain_known_columns(kind, &mut row);
    if !dropped.is_empty() {
        tracing::debug!("Ignoring unknown {kind} fields: {}", dropped.join(", "));
    }

    let id = match row.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => {
            return Err(Error::ApplyConflict(format!(
                "{kind} payload has no id"
            )))
        }
    };
    row.insert("id".to_string(), json!(id));

    let status = if queue.references(kind, &id).await {
        SyncStatus::PendingSync
    } else {
        SyncStatus::Synced
    };
    row.insert("sync_status".to_string(), json!(status.as_str()));

    Ok((id, row))
}

/// Insert or replace a remote record, filling in sync metadata the remote
/// did not send from the existing local row.
///
/// A record that does not decode as its entity is an `ApplyConflict` and
/// nothing is written.
pub(crate) async fn upsert_remote_record(
    store: &LocalStore,
    queue: &SyncQueue,
    kind: EntityKind,
    record: Value,
) -> Result<Row> {
    let _writes = queue.lock_writes().await;
    let (id, row) = remote_row(queue, kind, record).await?;
    replace_row(store, kind, &id, row).await
}

/// Store a record from a full remote listing unless local mutations for it
/// are still queued. Returns the stored row, or `None` when skipped.
pub(crate) async fn pull_remote_record(
    store: &LocalStore,
    queue: &SyncQueue,
    kind: EntityKind,
    record: Value,
) -> Result<Option<Row>> {
    let _writes = queue.lock_writes().await;
    let (id, row) = remote_row(queue, kind, record).await?;
    if row.get("sync_status") == Some(&json!(SyncStatus::PendingSync.as_str())) {
        tracing::debug!("Keeping local {kind} {id}; it has queued mutations");
        return Ok(None);
    }
    replace_row(store, kind, &id, row).await.map(Some)
}

/// Merge a remote partial record into an existing row.
///
/// A row that does not exist locally, or a merge that no longer decodes as
/// its entity, is an `ApplyConflict`.
pub(crate) async fn update_from_remote(
    store: &LocalStore,
    queue: &SyncQueue,
    kind: EntityKind,
    record: Value,
) -> Result<Row> {
    let _writes = queue.lock_writes().await;
    let (id, row) = remote_row(queue, kind, record).await?;
    let Some(mut merged) = store.get_by_id(kind, &id).await? else {
        return Err(Error::ApplyConflict(format!(
            "{} record {id} is not stored locally",
            kind.table()
        )));
    };
    merged.extend(row.clone());
    check_record(kind, &merged)?;

    store.update(kind, &id, &row).await.map_err(|error| match error {
        Error::NotFound { table, id } => {
            Error::ApplyConflict(format!("{table} record {id} is not stored locally"))
        }
        other => other,
    })
}

async fn replace_row(
    store: &LocalStore,
    kind: EntityKind,
    id: &str,
    mut row: Row,
) -> Result<Row> {
    let existing = store.get_by_id(kind, id).await?;
    let now = now_iso8601();

    for key in ["sync_id", "created_at", "updated_at"] {
        if row.get(key).is_some_and(|value| !value.is_null()) {
            continue;
        }
        let fallback = existing
            .as_ref()
            .and_then(|current| current.get(key))
            .filter(|value| !value.is_null())
            .cloned()
            .unwrap_or_else(|| match key {
                "sync_id" => json!(Uuid::new_v4().to_string()),
                _ => json!(now),
            });
        row.insert(key.to_string(), fallback);
    }

    check_record(kind, &row)?;
    store.upsert(kind, &row).await
}

/// Reject rows that would be stored but could not be read back as their
/// entity, e.g. an audit with an unknown status.
fn check_record(kind: EntityKind, row: &Row) -> Result<()> {
    let decoded = stored_form(kind, row).and_then(|row| match kind {
        EntityKind::User => Record::<User>::from_row(row).map(drop),
        EntityKind::Template => Record::<Template>::from_row(row).map(drop),
        EntityKind::Audit => Record::<Audit>::from_row(row).map(drop),
        EntityKind::Finding => Record::<Finding>::from_row(row).map(drop),
        EntityKind::Action => Record::<Action>::from_row(row).map(drop),
        EntityKind::File => Record::<FileMeta>::from_row(row).map(drop),
    });
    decoded.map_err(|error| {
        Error::ApplyConflict(format!("remote {kind} record rejected: {error}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{EntityRef, MutationType, QueueItem};
    use crate::state::SyncSignals;
    use pretty_assertions::assert_eq;

    fn remote_audit(id: &str) -> Value {
        json!({
            "id": id,
            "title": "Remote audit",
            "template": "tpl-1",
            "location": "HQ",
            "auditor": "user-2",
            "status": "in_progress",
            "findings": [],
        })
    }

    #[test]
    fn unwrap_envelope_only_strips_matching_key() {
        let inner = remote_audit("a1");
        assert_eq!(
            unwrap_envelope(EntityKind::Audit, json!({"audit": inner.clone()})),
            inner
        );
        let other = json!({"action": {"id": "x"}});
        assert_eq!(unwrap_envelope(EntityKind::Audit, other.clone()), other);
    }

    #[tokio::test]
    async fn upsert_fills_metadata_and_marks_synced() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let queue = SyncQueue::in_memory(SyncSignals::new());

        let row = upsert_remote_record(&store, &queue, EntityKind::Audit, remote_audit("a1"))
            .await
            .unwrap();
        assert_eq!(row["sync_status"], "synced");
        assert!(row["sync_id"].is_string());
        assert!(row["created_at"].is_string());
        assert!(row.get("findings").is_none());
    }

    #[tokio::test]
    async fn rows_with_queued_mutations_stay_pending() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let queue = SyncQueue::in_memory(SyncSignals::new());
        queue
            .enqueue(QueueItem::local(
                MutationType::Update,
                EntityRef::new(EntityKind::Audit, "a1"),
                json!({}),
            ))
            .await
            .unwrap();

        let row = upsert_remote_record(&store, &queue, EntityKind::Audit, remote_audit("a1"))
            .await
            .unwrap();
        assert_eq!(row["sync_status"], "pending_sync");
    }

    #[tokio::test]
    async fn update_of_absent_row_is_apply_conflict() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let queue = SyncQueue::in_memory(SyncSignals::new());
        let result = update_from_remote(
            &store,
            &queue,
            EntityKind::Audit,
            json!({"id": "ghost", "status": "completed"}),
        )
        .await;
        assert!(matches!(result, Err(Error::ApplyConflict(_))));
    }

    #[tokio::test]
    async fn payload_without_id_is_apply_conflict() {
        let store = LocalStore::open_in_memory().await.unwrap();
        let queue = SyncQueue::in_memory(SyncSignals::new());
        let result =
            upsert_remote_record(&store, &queue, EntityKind::Audit, json!({"title": "x"})).await;
        assert!(matches!(result, Err(Error::ApplyConflict(_))));
    }
}
