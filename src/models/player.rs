//! Player state records

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One content assignment on a player's playlist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentRef {
    #[serde(rename = "contentId", default)]
    pub content_id: String,
    #[serde(rename = "contentType", default)]
    pub content_type: String,
}

impl ContentRef {
    /// Decode a playlist entry from raw JSON, tolerating missing fields.
    pub fn from_value(raw: &Value) -> Option<Self> {
        let obj = raw.as_object()?;
        Some(Self {
            content_id: obj
                .get("contentId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            content_type: obj
                .get("contentType")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    }
}

/// Current content-assignment state of a player.
///
/// Overwritten wholesale on each update; the last reporter wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerState {
    #[serde(rename = "playerId")]
    pub player_id: String,
    #[serde(default)]
    pub content: Vec<ContentRef>,
    #[serde(default)]
    pub timestamp: i64,
}

impl PlayerState {
    pub fn new(player_id: impl Into<String>, content: Vec<ContentRef>, timestamp: i64) -> Self {
        Self {
            player_id: player_id.into(),
            content,
            timestamp,
        }
    }

    /// Content list as the enriched-payload shape `{id, type}`.
    pub fn content_payload(&self) -> Vec<Value> {
        self.content
            .iter()
            .map(|c| {
                serde_json::json!({
                    "id": c.content_id,
                    "type": c.content_type,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_roundtrip() {
        let state = PlayerState::new(
            "p-1",
            vec![ContentRef {
                content_id: "c-9".into(),
                content_type: "video".into(),
            }],
            1700000000,
        );
        let json = serde_json::to_string(&state).unwrap();
        let back: PlayerState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.player_id, "p-1");
        assert_eq!(back.content[0].content_id, "c-9");
        assert_eq!(back.timestamp, 1700000000);
    }

    #[test]
    fn test_state_tolerates_missing_fields() {
        let back: PlayerState = serde_json::from_str(r#"{"playerId":"p-2"}"#).unwrap();
        assert!(back.content.is_empty());
        assert_eq!(back.timestamp, 0);
    }

    #[test]
    fn test_content_ref_lenient_decode() {
        assert!(ContentRef::from_value(&json!("nope")).is_none());
        let c = ContentRef::from_value(&json!({"contentId": "c-1"})).unwrap();
        assert_eq!(c.content_id, "c-1");
        assert_eq!(c.content_type, "");
    }

    #[test]
    fn test_content_payload_shape() {
        let state = PlayerState::new(
            "p-3",
            vec![ContentRef {
                content_id: "c-2".into(),
                content_type: "image".into(),
            }],
            0,
        );
        let payload = state.content_payload();
        assert_eq!(payload[0], json!({"id": "c-2", "type": "image"}));
    }
}
