//! Engine configuration.
//!
//! `EngineConfig` is shared by every client of the core. It is loaded from a
//! JSON file, then environment overrides are applied on top, then validated.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, is_realtime_url, normalize_text_option};

pub const ENV_API_URL: &str = "QUICKAUDIT_API_URL";
pub const ENV_REALTIME_URL: &str = "QUICKAUDIT_REALTIME_URL";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DRAIN_INTERVAL_SECS: u64 = 5 * 60;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1000;

/// Runtime configuration for the sync engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// REST base URL, e.g. `https://api.quickaudit.com/api`
    #[serde(default)]
    pub api_base_url: Option<String>,
    /// Push channel URL; derived from `api_base_url` when absent
    #[serde(default)]
    pub realtime_url: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_drain_interval_secs")]
    pub drain_interval_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

const fn default_drain_interval_secs() -> u64 {
    DEFAULT_DRAIN_INTERVAL_SECS
}

const fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

const fn default_reconnect_base_delay_ms() -> u64 {
    DEFAULT_RECONNECT_BASE_DELAY_MS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base_url: None,
            realtime_url: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            drain_interval_secs: DEFAULT_DRAIN_INTERVAL_SECS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
        }
    }
}

impl EngineConfig {
    /// Load config from a JSON file. A missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str::<Self>(&raw).map_err(|error| {
            Error::Config(format!(
                "failed to parse config at {}: {error}",
                path.display()
            ))
        })
    }

    /// Apply overrides from an environment lookup (normally `std::env::var`).
    #[must_use]
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = normalize_text_option(lookup(ENV_API_URL)) {
            self.api_base_url = Some(url);
        }
        if let Some(url) = normalize_text_option(lookup(ENV_REALTIME_URL)) {
            self.realtime_url = Some(url);
        }
        self
    }

    /// Normalize URLs and reject unusable values.
    pub fn validate(mut self) -> Result<Self> {
        self.api_base_url = normalize_text_option(self.api_base_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
        self.realtime_url = normalize_text_option(self.realtime_url.take());

        if let Some(url) = &self.api_base_url {
            if !is_http_url(url) {
                return Err(Error::Config(
                    "api_base_url must include http:// or https://".to_string(),
                ));
            }
        }
        if let Some(url) = &self.realtime_url {
            if !is_realtime_url(url) {
                return Err(Error::Config(
                    "realtime_url must include ws://, wss://, http:// or https://".to_string(),
                ));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be > 0".to_string()));
        }
        if self.drain_interval_secs == 0 {
            return Err(Error::Config("drain_interval_secs must be > 0".to_string()));
        }
        if self.reconnect_base_delay_ms == 0 {
            return Err(Error::Config(
                "reconnect_base_delay_ms must be > 0".to_string(),
            ));
        }
        Ok(self)
    }

    /// Realtime URL, falling back to the API base with a `ws(s)` scheme.
    pub fn resolved_realtime_url(&self) -> Option<String> {
        if let Some(url) = &self.realtime_url {
            return Some(url.clone());
        }
        let base = self.api_base_url.as_deref()?;
        let base = base
            .strip_prefix("https://")
            .map(|rest| format!("wss://{rest}"))
            .or_else(|| base.strip_prefix("http://").map(|rest| format!("ws://{rest}")))?;
        Some(format!("{base}/realtime"))
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub const fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_sync_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.drain_interval(), Duration::from_secs(300));
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.reconnect_base_delay(), Duration::from_secs(1));
    }

    #[test]
    fn parse_fills_missing_fields_with_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"api_base_url": "https://api.example.com/api/"}"#).unwrap();
        let config = config.validate().unwrap();
        assert_eq!(
            config.api_base_url.as_deref(),
            Some("https://api.example.com/api")
        );
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        let error = serde_json::from_str::<EngineConfig>(r#"{"unexpected": true}"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn validate_rejects_non_http_api_url() {
        let config = EngineConfig {
            api_base_url: Some("api.example.com".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn env_overrides_take_precedence() {
        let config = EngineConfig {
            api_base_url: Some("https://file.example.com".to_string()),
            ..Default::default()
        }
        .with_env_overrides(|key| match key {
            ENV_API_URL => Some(" https://env.example.com ".to_string()),
            _ => None,
        });
        assert_eq!(
            config.api_base_url.as_deref(),
            Some("https://env.example.com")
        );
    }

    #[test]
    fn realtime_url_derived_from_api_base() {
        let config = EngineConfig {
            api_base_url: Some("https://api.example.com/api".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.resolved_realtime_url().as_deref(),
            Some("wss://api.example.com/api/realtime")
        );
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::load_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }
}
