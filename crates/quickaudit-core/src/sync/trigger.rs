//! Background drain triggers.
//!
//! Every trigger source feeds a single-slot channel. While a drain runs, any
//! number of requests collapse into one follow-up pass.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::driver::SyncDriver;
use crate::network::{Connectivity, NetworkMonitor};
use crate::state::{SyncSignals, SyncState};

/// Why a drain was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    Connectivity,
    Timer,
    RealtimeFallback,
    Manual,
}

/// Fire-and-forget handle for requesting a drain.
#[derive(Debug, Clone)]
pub struct DrainTrigger {
    tx: mpsc::Sender<TriggerReason>,
}

impl DrainTrigger {
    /// Trigger handle plus the receiver the drain worker consumes.
    pub fn channel() -> (Self, mpsc::Receiver<TriggerReason>) {
        let (tx, rx) = mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Request a drain without waiting for it.
    pub fn request(&self, reason: TriggerReason) {
        match self.tx.try_send(reason) {
            Ok(()) => tracing::debug!("Drain requested ({:?})", reason),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Drain already requested; {:?} coalesced", reason);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Drain worker stopped; {:?} ignored", reason);
            }
        }
    }
}

/// Run a drain for every request until shutdown.
///
/// Each pass is preceded by the initial pull until that has completed.
pub fn spawn_drain_worker(
    driver: Arc<SyncDriver>,
    mut requests: mpsc::Receiver<TriggerReason>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let reason = tokio::select! {
                _ = shutdown.changed() => break,
                reason = requests.recv() => match reason {
                    Some(reason) => reason,
                    None => break,
                },
            };
            if let Err(error) = driver.initial_pull().await {
                tracing::warn!("Initial pull failed: {}", error);
            }
            let report = driver.drain().await;
            tracing::debug!("Drain for {:?} finished: {:?}", reason, report);
        }
        tracing::debug!("Drain worker stopped");
    })
}

/// Request a drain every `period`, starting one period from now.
pub fn spawn_periodic_trigger(
    trigger: DrainTrigger,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => trigger.request(TriggerReason::Timer),
            }
        }
    })
}

/// Request a drain on every offline to online transition.
pub fn spawn_connectivity_listener(
    network: &NetworkMonitor,
    signals: SyncSignals,
    trigger: DrainTrigger,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut connectivity = network.subscribe();
    let mut previous = *connectivity.borrow_and_update();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *connectivity.borrow_and_update();
                    match (previous, current) {
                        (Connectivity::Offline, Connectivity::Online) => {
                            trigger.request(TriggerReason::Connectivity);
                        }
                        (_, Connectivity::Offline) => signals.set_state(SyncState::Offline),
                        _ => {}
                    }
                    previous = current;
                }
            }
        }
    })
}
