//! TriggerEngine - Audience Targeting Evaluation
//!
//! ## Responsibilities
//!
//! - Evaluate a player's trigger rules against the faces in one frame
//! - Maintain active-trigger and throttle marks in the state store
//! - Emit start/end decisions for the event distribution layer
//!
//! State model: a trigger is active for a face exactly while an
//! `trigger:active:<player>:<trigger>:<face>` key exists (TTL 1 hour as a
//! backstop for players that go silent). A throttle key suppresses
//! re-starting within a short window after the last start. Reads and
//! writes are independent single-key operations; two concurrent
//! evaluations of the same player can both observe "not active" and both
//! emit a start. The original system tolerates that race and so does this
//! one.

mod types;

pub use types::{Trigger, TriggerGender, TriggerGlasses};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::models::{Frame, PlayerState};
use crate::state_store::StateStore;

const DEFAULT_THROTTLE_MS: i64 = 300;
const ACTIVE_TRIGGER_TTL_SECS: u64 = 3600;

/// Start or end of a trigger for a player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerDecision {
    pub kind: DecisionKind,
    pub trigger_id: String,
    pub player_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionKind {
    Start,
    End,
}

/// Evaluation engine over the shared state store.
pub struct TriggerEngine {
    store: Arc<dyn StateStore>,
    throttle_ms: i64,
    active_ttl_secs: u64,
}

impl TriggerEngine {
    pub fn new(store: Arc<dyn StateStore>, throttle_ms: i64, active_ttl_secs: u64) -> Self {
        Self {
            store,
            throttle_ms,
            active_ttl_secs,
        }
    }

    pub fn with_defaults(store: Arc<dyn StateStore>) -> Self {
        Self::new(store, DEFAULT_THROTTLE_MS, ACTIVE_TRIGGER_TTL_SECS)
    }

    /// Evaluate one frame. Returns the start/end decisions to publish;
    /// any store-level failure degrades to "no decisions" rather than
    /// blocking frame processing.
    pub async fn evaluate(
        &self,
        triggers: &[Trigger],
        frame: &Frame,
        player_state: Option<&PlayerState>,
    ) -> Vec<TriggerDecision> {
        let player_state = match player_state {
            Some(state) if !state.player_id.is_empty() => state,
            _ => return Vec::new(),
        };
        if frame.face_detections.is_empty() || triggers.is_empty() {
            return Vec::new();
        }

        let player_id = player_state.player_id.as_str();
        let mut decisions = Vec::new();

        // Snapshot of currently active (trigger, face) pairs for this player
        let active = self.get_active_triggers(player_id).await;
        // Every pair evaluated this frame counts as seen, matching or not;
        // only marks for faces absent from the frame reconcile below.
        let mut seen: HashSet<String> = HashSet::new();

        for face in &frame.face_detections {
            let face_id = face.face_id.unwrap_or(0).to_string();

            for trigger in triggers {
                let active_key = format!("{}:{}", trigger.id, face_id);
                let is_active = active.contains_key(&active_key);
                seen.insert(active_key);

                if trigger.matches(face) {
                    if !is_active && !self.is_throttled(player_id, &trigger.id, &face_id).await {
                        decisions.push(TriggerDecision {
                            kind: DecisionKind::Start,
                            trigger_id: trigger.id.clone(),
                            player_id: player_id.to_string(),
                        });

                        self.set_active(player_id, &trigger.id, &face_id).await;
                        self.set_throttle(player_id, &trigger.id, &face_id).await;

                        tracing::debug!(
                            player_id = %player_id,
                            trigger_id = %trigger.id,
                            face_id = %face_id,
                            "Trigger activated"
                        );
                    }
                } else if is_active {
                    decisions.push(TriggerDecision {
                        kind: DecisionKind::End,
                        trigger_id: trigger.id.clone(),
                        player_id: player_id.to_string(),
                    });

                    self.remove_active(player_id, &trigger.id, &face_id).await;

                    tracing::debug!(
                        player_id = %player_id,
                        trigger_id = %trigger.id,
                        face_id = %face_id,
                        "Trigger deactivated"
                    );
                }
            }
        }

        // Reconciliation: anything still marked active but not seen this
        // frame belongs to a face that left, so it ends now instead of
        // waiting out the TTL.
        for active_key in active.keys() {
            if seen.contains(active_key) {
                continue;
            }
            let Some((trigger_id, face_id)) = active_key.split_once(':') else {
                continue;
            };

            decisions.push(TriggerDecision {
                kind: DecisionKind::End,
                trigger_id: trigger_id.to_string(),
                player_id: player_id.to_string(),
            });

            self.remove_active(player_id, trigger_id, face_id).await;

            tracing::debug!(
                player_id = %player_id,
                trigger_id = %trigger_id,
                face_id = %face_id,
                "Trigger ended (face disappeared)"
            );
        }

        decisions
    }

    /// Map of "triggerId:faceId" -> activation timestamp for a player.
    async fn get_active_triggers(&self, player_id: &str) -> HashMap<String, i64> {
        let pattern = format!("trigger:active:{player_id}:*");
        let keys = match self.store.keys(&pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::error!(player_id = %player_id, error = %e, "Store error listing active triggers");
                return HashMap::new();
            }
        };

        let mut active = HashMap::new();
        for key in keys {
            let parts: Vec<&str> = key.split(':').collect();
            if parts.len() < 5 {
                continue;
            }
            let entry = format!("{}:{}", parts[3], parts[4]);
            let timestamp = match self.store.get(&key).await {
                Ok(value) => value.and_then(|v| v.parse().ok()).unwrap_or(0),
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "Store error reading active trigger");
                    0
                }
            };
            active.insert(entry, timestamp);
        }
        active
    }

    async fn is_throttled(&self, player_id: &str, trigger_id: &str, face_id: &str) -> bool {
        let key = format!("trigger:throttle:{player_id}:{trigger_id}:{face_id}");
        let last_ms: i64 = match self.store.get(&key).await {
            Ok(Some(value)) => match value.parse() {
                Ok(ms) => ms,
                Err(_) => return false,
            },
            Ok(None) => return false,
            Err(e) => {
                tracing::error!(
                    player_id = %player_id,
                    trigger_id = %trigger_id,
                    face_id = %face_id,
                    error = %e,
                    "Store error checking throttle"
                );
                return false;
            }
        };

        now_ms() - last_ms < self.throttle_ms
    }

    async fn set_throttle(&self, player_id: &str, trigger_id: &str, face_id: &str) {
        let key = format!("trigger:throttle:{player_id}:{trigger_id}:{face_id}");
        let ttl_secs = ((self.throttle_ms as u64).div_ceil(1000)).max(1);
        if let Err(e) = self
            .store
            .set_ex(&key, &now_ms().to_string(), ttl_secs)
            .await
        {
            tracing::error!(key = %key, error = %e, "Store error setting throttle");
        }
    }

    async fn set_active(&self, player_id: &str, trigger_id: &str, face_id: &str) {
        let key = format!("trigger:active:{player_id}:{trigger_id}:{face_id}");
        if let Err(e) = self
            .store
            .set_ex(&key, &now_ms().to_string(), self.active_ttl_secs)
            .await
        {
            tracing::error!(key = %key, error = %e, "Store error setting active trigger");
        }
    }

    async fn remove_active(&self, player_id: &str, trigger_id: &str, face_id: &str) {
        let key = format!("trigger:active:{player_id}:{trigger_id}:{face_id}");
        if let Err(e) = self.store.del(&key).await {
            tracing::error!(key = %key, error = %e, "Store error removing active trigger");
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::{MemoryStore, StateStore as _};
    use serde_json::json;

    fn frame(faces: serde_json::Value) -> Frame {
        Frame::from_value(&json!({
            "timestamp": 1700000000,
            "playerUUID": "p-1",
            "faceDetections": faces
        }))
        .unwrap()
    }

    fn state() -> PlayerState {
        PlayerState::new("p-1", Vec::new(), 1700000000)
    }

    fn engine(store: Arc<MemoryStore>) -> TriggerEngine {
        TriggerEngine::with_defaults(store)
    }

    fn catch_all() -> Vec<Trigger> {
        Trigger::decode_list(&[json!({"id": "t-1"})])
    }

    #[tokio::test]
    async fn test_start_once_then_end_on_disappearance() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);
        let triggers = catch_all();

        // First appearance: exactly one start
        let decisions = engine
            .evaluate(&triggers, &frame(json!([{"faceID": 1}])), Some(&state()))
            .await;
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].kind, DecisionKind::Start);
        assert_eq!(decisions[0].trigger_id, "t-1");
        assert_eq!(decisions[0].player_id, "p-1");

        // Still present: no duplicate start
        let decisions = engine
            .evaluate(&triggers, &frame(json!([{"faceID": 1}])), Some(&state()))
            .await;
        assert!(decisions.is_empty());

        // Face gone, another face appears: end for 1, start for 2
        let decisions = engine
            .evaluate(&triggers, &frame(json!([{"faceID": 2}])), Some(&state()))
            .await;
        let starts: Vec<_> = decisions
            .iter()
            .filter(|d| d.kind == DecisionKind::Start)
            .collect();
        let ends: Vec<_> = decisions
            .iter()
            .filter(|d| d.kind == DecisionKind::End)
            .collect();
        assert_eq!(starts.len(), 1);
        assert_eq!(ends.len(), 1);
    }

    #[tokio::test]
    async fn test_separate_faces_activate_independently() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);
        let triggers = catch_all();

        let decisions = engine
            .evaluate(
                &triggers,
                &frame(json!([{"faceID": 1}, {"faceID": 2}])),
                Some(&state()),
            )
            .await;
        assert_eq!(decisions.len(), 2);
        assert!(decisions.iter().all(|d| d.kind == DecisionKind::Start));
    }

    #[tokio::test]
    async fn test_end_when_predicate_stops_matching() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store);
        let triggers = Trigger::decode_list(&[json!({"id": "t-1", "age": [20, 30]})]);

        let decisions = engine
            .evaluate(
                &triggers,
                &frame(json!([{"faceID": 1, "age": 25}])),
                Some(&state()),
            )
            .await;
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].kind, DecisionKind::Start);

        let decisions = engine
            .evaluate(
                &triggers,
                &frame(json!([{"faceID": 1, "age": 35}])),
                Some(&state()),
            )
            .await;
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].kind, DecisionKind::End);
    }

    #[tokio::test]
    async fn test_throttle_suppresses_restart() {
        let store = Arc::new(MemoryStore::new());
        // Large throttle window so the whole test sits inside it
        let engine = TriggerEngine::new(store, 60_000, 3600);
        let triggers = Trigger::decode_list(&[json!({"id": "t-1", "age": [20, 30]})]);

        let decisions = engine
            .evaluate(
                &triggers,
                &frame(json!([{"faceID": 1, "age": 25}])),
                Some(&state()),
            )
            .await;
        assert_eq!(decisions[0].kind, DecisionKind::Start);

        // Stops matching: end, active mark removed
        let decisions = engine
            .evaluate(
                &triggers,
                &frame(json!([{"faceID": 1, "age": 35}])),
                Some(&state()),
            )
            .await;
        assert_eq!(decisions[0].kind, DecisionKind::End);

        // Matches again inside the throttle window: no new start
        let decisions = engine
            .evaluate(
                &triggers,
                &frame(json!([{"faceID": 1, "age": 25}])),
                Some(&state()),
            )
            .await;
        assert!(decisions.is_empty());
    }

    #[tokio::test]
    async fn test_restart_after_throttle_elapses() {
        let store = Arc::new(MemoryStore::new());
        let engine = TriggerEngine::new(store, 1, 3600);
        let triggers = Trigger::decode_list(&[json!({"id": "t-1", "age": [20, 30]})]);

        let first = engine
            .evaluate(
                &triggers,
                &frame(json!([{"faceID": 1, "age": 25}])),
                Some(&state()),
            )
            .await;
        assert_eq!(first[0].kind, DecisionKind::Start);

        let ended = engine
            .evaluate(
                &triggers,
                &frame(json!([{"faceID": 1, "age": 35}])),
                Some(&state()),
            )
            .await;
        assert_eq!(ended[0].kind, DecisionKind::End);

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let restarted = engine
            .evaluate(
                &triggers,
                &frame(json!([{"faceID": 1, "age": 25}])),
                Some(&state()),
            )
            .await;
        assert_eq!(restarted.len(), 1);
        assert_eq!(restarted[0].kind, DecisionKind::Start);
    }

    #[tokio::test]
    async fn test_empty_inputs_short_circuit() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine(store.clone());
        let triggers = catch_all();

        // No player state
        assert!(engine
            .evaluate(&triggers, &frame(json!([{"faceID": 1}])), None)
            .await
            .is_empty());
        // No faces
        assert!(engine
            .evaluate(&triggers, &frame(json!([])), Some(&state()))
            .await
            .is_empty());
        // No triggers
        assert!(engine
            .evaluate(&[], &frame(json!([{"faceID": 1}])), Some(&state()))
            .await
            .is_empty());
        // None of the above left marks behind
        assert!(store.keys("trigger:*").await.unwrap().is_empty());
    }
}
