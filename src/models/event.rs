//! Event envelopes carried through the delivery queues

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Known event kinds pushed to players.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    TriggerStart,
    TriggerEnd,
    Ack,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TriggerStart => "event.triggerStart",
            Self::TriggerEnd => "event.triggerEnd",
            Self::Ack => "event.ack",
            Self::Error => "event.error",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transit envelope `{type, data}`.
///
/// Exists only while an event moves through a queue or over a socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

impl EventEnvelope {
    pub fn new(event_type: EventType, data: Value) -> Self {
        Self {
            event_type: event_type.as_str().to_string(),
            data,
        }
    }

    /// Ack reply referencing the message that was handled.
    pub fn ack(reference: &str) -> Self {
        Self::new(EventType::Ack, serde_json::json!({ "ref": reference }))
    }

    /// Ack reply with extra fields merged into the data object.
    pub fn ack_with(reference: &str, extra: Value) -> Self {
        let mut data = serde_json::json!({ "ref": reference });
        if let (Some(map), Some(extra)) = (data.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                map.insert(k.clone(), v.clone());
            }
        }
        Self::new(EventType::Ack, data)
    }

    /// Error reply referencing the message that failed.
    pub fn error(reference: &str, message: &str) -> Self {
        Self::new(
            EventType::Error,
            serde_json::json!({ "ref": reference, "error": message }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(EventType::TriggerStart.as_str(), "event.triggerStart");
        assert_eq!(EventType::TriggerEnd.as_str(), "event.triggerEnd");
        assert_eq!(EventType::Ack.to_string(), "event.ack");
    }

    #[test]
    fn test_envelope_serialization() {
        let env = EventEnvelope::new(EventType::TriggerStart, serde_json::json!({"id": "t1"}));
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains(r#""type":"event.triggerStart""#));
        assert!(json.contains(r#""id":"t1""#));
    }

    #[test]
    fn test_envelope_default_data() {
        let env: EventEnvelope = serde_json::from_str(r#"{"type":"event.ack"}"#).unwrap();
        assert!(env.data.is_null());
    }

    #[test]
    fn test_ack_with_counts() {
        let env = EventEnvelope::ack_with(
            "player.triggers",
            serde_json::json!({"accepted": 2, "rejected": 1}),
        );
        assert_eq!(env.data["ref"], "player.triggers");
        assert_eq!(env.data["accepted"], 2);
        assert_eq!(env.data["rejected"], 1);
    }
}
