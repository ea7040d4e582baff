//! Realtime push channel.
//!
//! Server events arrive over a persistent connection and are written
//! straight into the local store. Events that cannot be applied are queued
//! as refetches for the sync driver.

mod apply;
mod backoff;
mod channel;
mod event;
mod transport;

pub use apply::EventApplier;
pub use backoff::Backoff;
pub use channel::{ChannelOptions, ChannelState, DisconnectReason, RealtimeChannel};
pub use event::{encode, RealtimeEvent};
pub use transport::{websocket_url, Connection, Transport, WebSocketTransport};
