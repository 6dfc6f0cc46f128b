//! IngestPipeline - Frame Orchestration
//!
//! ## Responsibilities
//!
//! - Validate and decode one incoming frame
//! - Resolve the originating player and enrich the payload with its
//!   current content context
//! - Run trigger evaluation and publish decisions to both transports
//! - Hand the enriched payload back for archive forwarding
//!
//! Every failure path degrades: an undecodable frame is dropped, an
//! unresolvable player just skips enrichment and evaluation. Nothing in
//! here may block the rest of an ingestion batch.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::event_broker::EventBroker;
use crate::models::{EventType, Frame};
use crate::player_directory::PlayerDirectory;
use crate::trigger_engine::{DecisionKind, Trigger, TriggerEngine};

/// One-frame orchestrator.
pub struct IngestPipeline {
    directory: Arc<PlayerDirectory>,
    trigger_engine: Arc<TriggerEngine>,
    sse_broker: Arc<EventBroker>,
    socket_broker: Arc<EventBroker>,
}

impl IngestPipeline {
    pub fn new(
        directory: Arc<PlayerDirectory>,
        trigger_engine: Arc<TriggerEngine>,
        sse_broker: Arc<EventBroker>,
        socket_broker: Arc<EventBroker>,
    ) -> Self {
        Self {
            directory,
            trigger_engine,
            sse_broker,
            socket_broker,
        }
    }

    /// Process one raw frame record.
    ///
    /// Returns the enriched payload to forward downstream, or `None`
    /// when the record failed validation and was dropped.
    pub async fn process_frame(&self, raw: &Value) -> Option<Value> {
        let Some(frame) = Frame::from_value(raw) else {
            tracing::info!(
                player_uuid = raw.get("playerUUID").and_then(|v| v.as_str()).unwrap_or(""),
                "Frame validation failed"
            );
            return None;
        };

        tracing::debug!(
            player_uuid = frame.player_uuid.as_deref().unwrap_or(""),
            face_count = frame.face_detections.len(),
            timestamp = frame.timestamp,
            "Processing frame"
        );

        let player_id = self
            .directory
            .resolve_player(frame.camera_id.as_deref(), frame.player_uuid.as_deref())
            .await;
        let state = match &player_id {
            Some(player_id) => self.directory.get_state(player_id).await,
            None => None,
        };

        let mut payload = match serde_json::to_value(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode frame payload");
                return None;
            }
        };

        if let Some(state) = &state {
            payload["player"] = json!({
                "playerId": state.player_id,
                "content": state.content_payload(),
            });

            let rules = self
                .directory
                .get_triggers(&state.player_id)
                .await
                .unwrap_or_default();
            let triggers = Trigger::decode_list(&rules);

            let decisions = self
                .trigger_engine
                .evaluate(&triggers, &frame, Some(state))
                .await;

            for decision in decisions {
                let event_type = match decision.kind {
                    DecisionKind::Start => EventType::TriggerStart,
                    DecisionKind::End => EventType::TriggerEnd,
                };
                tracing::info!(
                    trigger_id = %decision.trigger_id,
                    player_id = %decision.player_id,
                    "{event_type}"
                );

                let data = json!({ "id": decision.trigger_id });
                self.sse_broker
                    .publish(&decision.player_id, event_type, data.clone())
                    .await;
                self.socket_broker
                    .publish(&decision.player_id, event_type, data)
                    .await;
            }
        }

        Some(payload)
    }
}
