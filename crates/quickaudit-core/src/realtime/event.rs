//! Realtime message format.
//!
//! Messages are JSON objects `{"type": "<entity>.<change>", "data": ...}`
//! where `data` is the record itself or wrapped as `{"<entity>": record}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{ChangeKind, EntityKind};
use crate::sync::remote::unwrap_envelope;

#[derive(Debug, Deserialize, Serialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: Value,
}

/// A server-originated entity change.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeEvent {
    pub kind: EntityKind,
    pub change: ChangeKind,
    pub record: Value,
}

impl RealtimeEvent {
    pub fn parse(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|error| Error::InvalidInput(format!("malformed realtime message: {error}")))?;

        let (entity, change) = envelope.event_type.split_once('.').ok_or_else(|| {
            Error::InvalidInput(format!("unknown event type {}", envelope.event_type))
        })?;
        let kind = EntityKind::from_event_name(entity)
            .ok_or_else(|| Error::InvalidInput(format!("unknown entity in {}", envelope.event_type)))?;
        let change = change.parse::<ChangeKind>()?;

        Ok(Self {
            kind,
            change,
            record: unwrap_envelope(kind, envelope.data),
        })
    }

    /// The id of the record the event concerns.
    pub fn record_id(&self) -> Option<String> {
        match self.record.get("id")? {
            Value::String(id) if !id.trim().is_empty() => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Event name, e.g. `audit.updated`.
    pub fn name(&self) -> String {
        format!("{}.{}", self.kind.event_name(), self.change.as_str())
    }
}

/// Encode an outbound message.
pub fn encode(event_type: &str, data: &Value) -> Result<String> {
    Ok(serde_json::to_string(&Envelope {
        event_type: event_type.to_string(),
        data: data.clone(),
    })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parses_bare_and_wrapped_records() {
        let bare = RealtimeEvent::parse(r#"{"type":"audit.updated","data":{"id":"a1"}}"#).unwrap();
        assert_eq!(bare.kind, EntityKind::Audit);
        assert_eq!(bare.change, ChangeKind::Updated);
        assert_eq!(bare.record_id().as_deref(), Some("a1"));

        let wrapped =
            RealtimeEvent::parse(r#"{"type":"action.created","data":{"action":{"id":"x9"}}}"#)
                .unwrap();
        assert_eq!(wrapped.kind, EntityKind::Action);
        assert_eq!(wrapped.record, json!({"id": "x9"}));
        assert_eq!(wrapped.name(), "action.created");
    }

    #[test]
    fn rejects_unknown_or_malformed_messages() {
        assert!(RealtimeEvent::parse("not json").is_err());
        assert!(RealtimeEvent::parse(r#"{"type":"invoice.created","data":{}}"#).is_err());
        assert!(RealtimeEvent::parse(r#"{"type":"audit.archived","data":{}}"#).is_err());
        assert!(RealtimeEvent::parse(r#"{"type":"audit","data":{}}"#).is_err());
    }

    #[test]
    fn encode_uses_type_and_data() {
        let text = encode("audit.viewing", &json!({"id": "a1"})).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "audit.viewing", "data": {"id": "a1"}}));
    }
}
