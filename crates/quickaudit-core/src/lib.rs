//! quickaudit-core - offline-first sync engine for QuickAudit
//!
//! Entities are written to a local SQLite store first and replayed to the
//! remote API through a persistent sync queue. Server-side changes arrive
//! over a realtime channel and are applied locally.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod network;
pub mod queue;
pub mod realtime;
pub mod state;
pub mod sync;
mod util;

#[cfg(test)]
mod test_support;

pub use engine::{StorageLocation, SyncEngine};
pub use error::{Error, Result};
