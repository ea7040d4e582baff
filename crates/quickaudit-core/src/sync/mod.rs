//! Queue draining against the remote API.

mod driver;
pub(crate) mod remote;
mod trigger;

pub use driver::{DrainOutcome, DrainReport, SyncDriver};
pub use trigger::{
    spawn_connectivity_listener, spawn_drain_worker, spawn_periodic_trigger, DrainTrigger,
    TriggerReason,
};
