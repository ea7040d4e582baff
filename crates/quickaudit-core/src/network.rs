//! Connectivity observation.

use tokio::sync::watch;

/// Device connectivity as reported by the platform observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connectivity {
    #[default]
    Online,
    Offline,
}

impl Connectivity {
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Current connectivity plus a stream of transitions.
#[derive(Debug, Clone)]
pub struct NetworkMonitor {
    tx: watch::Sender<Connectivity>,
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(Connectivity::default())
    }
}

impl NetworkMonitor {
    pub fn new(initial: Connectivity) -> Self {
        Self {
            tx: watch::channel(initial).0,
        }
    }

    pub fn current(&self) -> Connectivity {
        *self.tx.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }

    /// Report a connectivity reading. Repeated readings are not transitions.
    pub fn set(&self, connectivity: Connectivity) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == connectivity {
                return false;
            }
            *current = connectivity;
            true
        });
        if changed {
            tracing::info!("Connectivity changed: {:?}", connectivity);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_real_transitions_notify() {
        let monitor = NetworkMonitor::default();
        let mut rx = monitor.subscribe();

        monitor.set(Connectivity::Online);
        assert!(!rx.has_changed().unwrap());

        monitor.set(Connectivity::Offline);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), Connectivity::Offline);
        assert!(!monitor.is_online());
    }
}
