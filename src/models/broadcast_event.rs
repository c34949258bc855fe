use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// A broadcast event delivered on a channel.
///
/// This is the server-to-client wire shape and also the payload carried
/// across the in-process fan-out bus:
///
/// ```json
/// {"channel": "orders", "event": "created", "payload": {"entity_id": "42"}}
/// ```
///
/// `channel` and `event` are always present; `payload` is an open map and
/// may be empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEvent {
    /// Channel the event was published on
    pub channel: String,
    /// Event name (mirrors `payload.type` on the emit side)
    pub event: String,
    /// Free-form event payload
    #[serde(default)]
    pub payload: Map<String, JsonValue>,
}

impl BroadcastEvent {
    /// Build an event for the local emit path.
    ///
    /// The `event` field is copied from `payload.type`; a payload without a
    /// string `type` produces an empty event name rather than an error.
    pub fn from_emit(channel: impl Into<String>, payload: Map<String, JsonValue>) -> Self {
        let event = payload
            .get("type")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        Self {
            channel: channel.into(),
            event,
            payload,
        }
    }

    /// Returns the `entity_id` payload field, if present
    pub fn entity_id(&self) -> Option<&str> {
        self.payload.get("entity_id").and_then(JsonValue::as_str)
    }
}
