//! Shared sync observables.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};

use crate::models::{ChangeKind, EntityKind};

/// Coarse sync state for status displays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncState {
    Offline,
    Syncing,
    #[default]
    Synced,
    /// Mutations are queued but no drain is running
    Pending,
}

/// "Local data changed" notification emitted after every local write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalChange {
    pub kind: EntityKind,
    pub id: String,
    pub change: ChangeKind,
}

const CHANGE_CAPACITY: usize = 256;

struct Inner {
    pending: watch::Sender<usize>,
    last_sync: watch::Sender<Option<DateTime<Utc>>>,
    state: watch::Sender<SyncState>,
    changes: broadcast::Sender<LocalChange>,
}

/// Pending counter, last-sync time, sync state and change notifications.
///
/// Cheap to clone; all clones observe the same values.
#[derive(Clone)]
pub struct SyncSignals {
    inner: Arc<Inner>,
}

impl Default for SyncSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SyncSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncSignals")
            .field("pending", &self.pending_count())
            .field("last_sync", &self.last_sync())
            .field("state", &self.state())
            .finish()
    }
}

impl SyncSignals {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: watch::channel(0).0,
                last_sync: watch::channel(None).0,
                state: watch::channel(SyncState::default()).0,
                changes: broadcast::channel(CHANGE_CAPACITY).0,
            }),
        }
    }

    pub fn pending_count(&self) -> usize {
        *self.inner.pending.borrow()
    }

    pub fn subscribe_pending(&self) -> watch::Receiver<usize> {
        self.inner.pending.subscribe()
    }

    pub fn increment_pending(&self) {
        self.inner.pending.send_modify(|count| *count += 1);
    }

    pub fn decrement_pending(&self) {
        self.inner
            .pending
            .send_modify(|count| *count = count.saturating_sub(1));
    }

    pub fn set_pending(&self, count: usize) {
        self.inner.pending.send_replace(count);
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_sync.borrow()
    }

    pub fn subscribe_last_sync(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.inner.last_sync.subscribe()
    }

    /// Record a successful exchange with the remote.
    pub fn touch_last_sync(&self) {
        self.inner.last_sync.send_replace(Some(Utc::now()));
    }

    pub fn state(&self) -> SyncState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    pub fn set_state(&self, state: SyncState) {
        self.inner.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<LocalChange> {
        self.inner.changes.subscribe()
    }

    pub fn notify_change(&self, kind: EntityKind, id: impl Into<String>, change: ChangeKind) {
        // No subscribers is fine.
        let _ = self.inner.changes.send(LocalChange {
            kind,
            id: id.into(),
            change,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn pending_counter_saturates_at_zero() {
        let signals = SyncSignals::new();
        signals.increment_pending();
        signals.increment_pending();
        assert_eq!(signals.pending_count(), 2);

        signals.decrement_pending();
        signals.decrement_pending();
        signals.decrement_pending();
        assert_eq!(signals.pending_count(), 0);
    }

    #[tokio::test]
    async fn clones_share_observables() {
        let signals = SyncSignals::new();
        let mut pending = signals.subscribe_pending();
        let clone = signals.clone();

        clone.set_pending(3);
        pending.changed().await.unwrap();
        assert_eq!(*pending.borrow(), 3);

        assert!(signals.last_sync().is_none());
        clone.touch_last_sync();
        assert!(signals.last_sync().is_some());
    }

    #[tokio::test]
    async fn change_notifications_are_broadcast() {
        let signals = SyncSignals::new();
        let mut changes = signals.subscribe_changes();
        signals.notify_change(EntityKind::Audit, "a1", ChangeKind::Updated);

        let change = changes.recv().await.unwrap();
        assert_eq!(
            change,
            LocalChange {
                kind: EntityKind::Audit,
                id: "a1".to_string(),
                change: ChangeKind::Updated,
            }
        );
    }
}
