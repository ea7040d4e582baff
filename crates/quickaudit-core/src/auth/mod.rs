//! Access-token providers for the remote API and realtime channel.
//!
//! Token acquisition and storage belong to the host application; the engine
//! only asks for the current token when it needs one.

use std::fmt;
use std::sync::{Arc, RwLock};

use crate::util::normalize_text_option;

/// Source of the current access token.
pub trait CredentialProvider: Send + Sync {
    /// Current bearer token, `None` when signed out.
    fn access_token(&self) -> Option<String>;
}

/// Fixed token, e.g. from `QUICKAUDIT_TOKEN`.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: normalize_text_option(token),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("StaticCredentials")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl CredentialProvider for StaticCredentials {
    fn access_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// Token that the host can replace after sign-in, refresh or sign-out.
#[derive(Clone, Default)]
pub struct SharedCredentials {
    token: Arc<RwLock<Option<String>>>,
}

impl SharedCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_token(&self, token: Option<String>) {
        let token = normalize_text_option(token);
        match self.token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }
}

impl fmt::Debug for SharedCredentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SharedCredentials")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl CredentialProvider for SharedCredentials {
    fn access_token(&self) -> Option<String> {
        match self.token.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}
