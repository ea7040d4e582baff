use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] quickaudit_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("Audit ID cannot be empty")]
    EmptyAuditId,
    #[error("Audit not found: {0}")]
    AuditNotFound(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Sync is not configured. Set api_base_url in the config file or QUICKAUDIT_API_URL to enable `quickaudit sync`."
    )]
    SyncNotConfigured,
}
