//! Error types for quickaudit-core

use thiserror::Error;

/// Result type alias using quickaudit-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in quickaudit-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Store creation or migration failed; fatal to startup
    #[error("Storage initialization failed: {0}")]
    StorageInit(String),

    /// Duplicate primary key or missing required column
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Row not found
    #[error("{table} record not found: {id}")]
    NotFound { table: &'static str, id: String },

    /// The store was closed and can no longer be used
    #[error("Local store is closed")]
    StoreClosed,

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// `SQLite` error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Network-level failure talking to the remote (connect, timeout, socket)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote answered with a non-success status
    #[error("Remote API error: {message} ({status})")]
    Remote { status: u16, message: String },

    /// Realtime channel gave up reconnecting
    #[error("Realtime channel gave up after {attempts} reconnect attempts")]
    MaxReconnectExceeded { attempts: u32 },

    /// An inbound realtime event could not be applied to the local store
    #[error("Could not apply realtime event: {0}")]
    ApplyConflict(String),

    /// No credential available from the auth provider
    #[error("No authentication credential available")]
    NotAuthenticated,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this is a missing-row error.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}
