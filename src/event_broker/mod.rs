//! EventBroker - Queue-Backed Event Distribution
//!
//! ## Responsibilities
//!
//! - Publish typed events into a per-player, per-transport list queue
//! - Consume side for both transports (non-blocking and blocking pop)
//!
//! Two broker instances exist, differing only in queue prefix: one feeds
//! the polling (SSE) transport, one the persistent socket transport. A
//! publish is fire-and-forget: serialization or store failures are logged
//! and swallowed, at-most-once per call, no retry.

use std::sync::Arc;

use serde_json::Value;

use crate::models::{EventEnvelope, EventType};
use crate::state_store::StateStore;

const SSE_QUEUE_PREFIX: &str = "sse:queue:";
const SOCKET_QUEUE_PREFIX: &str = "ws:queue:";

/// Per-transport event queue over the shared state store.
pub struct EventBroker {
    store: Arc<dyn StateStore>,
    prefix: &'static str,
}

impl EventBroker {
    /// Broker feeding the polling (SSE) transport.
    pub fn sse(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            prefix: SSE_QUEUE_PREFIX,
        }
    }

    /// Broker feeding the persistent socket transport.
    pub fn socket(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            prefix: SOCKET_QUEUE_PREFIX,
        }
    }

    fn queue_key(&self, player_id: &str) -> String {
        format!("{}{}", self.prefix, player_id)
    }

    /// Append an event to the player's queue.
    pub async fn publish(&self, player_id: &str, event_type: EventType, data: Value) {
        let envelope = EventEnvelope::new(event_type, data);
        let message = match serde_json::to_string(&envelope) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(
                    player_id = %player_id,
                    event_type = %event_type,
                    error = %e,
                    "Failed to encode event message"
                );
                return;
            }
        };

        let key = self.queue_key(player_id);
        if let Err(e) = self.store.rpush(&key, &message).await {
            tracing::error!(
                player_id = %player_id,
                event_type = %event_type,
                error = %e,
                "Store error publishing event"
            );
            return;
        }

        tracing::debug!(
            player_id = %player_id,
            event_type = %event_type,
            queue_key = %key,
            "Event published"
        );
    }

    /// Pop one raw serialized message, `None` when the queue is empty or
    /// the store fails.
    pub async fn pop_raw(&self, player_id: &str) -> Option<String> {
        match self.store.lpop(&self.queue_key(player_id)).await {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(player_id = %player_id, error = %e, "Store error popping event");
                None
            }
        }
    }

    /// Blocking pop with a timeout, decoded into an envelope. Timeouts,
    /// store failures and undecodable messages all come back as `None`.
    pub async fn blocking_pop(&self, player_id: &str, timeout_secs: u64) -> Option<EventEnvelope> {
        let payload = match self
            .store
            .blpop(&self.queue_key(player_id), timeout_secs)
            .await
        {
            Ok(Some(payload)) => payload,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(player_id = %player_id, error = %e, "Store error in blocking pop");
                return None;
            }
        };

        match serde_json::from_str(&payload) {
            Ok(envelope) => Some(envelope),
            Err(e) => {
                tracing::warn!(player_id = %player_id, error = %e, "Failed to decode queued event");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::{MemoryStore, StateStore as _};
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_pop_roundtrip() {
        let store = Arc::new(MemoryStore::new());
        let broker = EventBroker::socket(store);
        broker
            .publish("p-1", EventType::TriggerStart, json!({"id": "t-1"}))
            .await;

        let raw = broker.pop_raw("p-1").await.unwrap();
        let envelope: EventEnvelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(envelope.event_type, "event.triggerStart");
        assert_eq!(envelope.data["id"], "t-1");
        assert!(broker.pop_raw("p-1").await.is_none());
    }

    #[tokio::test]
    async fn test_transport_queues_are_independent() {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let sse = EventBroker::sse(store.clone());
        let socket = EventBroker::socket(store);

        sse.publish("p-1", EventType::TriggerStart, json!({"id": "t-1"}))
            .await;

        assert!(socket.pop_raw("p-1").await.is_none());
        assert!(sse.pop_raw("p-1").await.is_some());
    }

    #[tokio::test]
    async fn test_blocking_pop_decodes() {
        let store = Arc::new(MemoryStore::new());
        let broker = EventBroker::sse(store);
        broker
            .publish("p-1", EventType::TriggerEnd, json!({"id": "t-9"}))
            .await;

        let envelope = broker.blocking_pop("p-1", 1).await.unwrap();
        assert_eq!(envelope.event_type, "event.triggerEnd");
    }

    #[tokio::test]
    async fn test_blocking_pop_skips_garbage() {
        let store = Arc::new(MemoryStore::new());
        store.rpush("sse:queue:p-1", "not json").await.unwrap();
        let broker = EventBroker::sse(store);
        assert!(broker.blocking_pop("p-1", 1).await.is_none());
    }
}
