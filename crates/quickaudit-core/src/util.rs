//! Small helpers shared by config, models and the sync layers.

use chrono::{SecondsFormat, Utc};

/// Trim optional text; blank values become `None`.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// `http://` or `https://` URL.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Check if a string is a realtime endpoint (`ws(s)://` or `http(s)://`).
pub fn is_realtime_url(value: &str) -> bool {
    value.starts_with("ws://") || value.starts_with("wss://") || is_http_url(value)
}

/// Trimmed prefix of a response body, for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current time as an RFC 3339 UTC timestamp with millisecond precision.
pub fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    Utc::now().timestamp_millis()
}
