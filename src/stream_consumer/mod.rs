//! StreamConsumer - Polling (SSE) Transport
//!
//! ## Responsibilities
//!
//! - One long-lived event stream per connected client
//! - Blocking consumption of the player's SSE queue with keepalive
//!
//! The state machine per client: emit a retry hint on open, then loop on
//! a bounded blocking pop. A popped message becomes a typed event and
//! resets the heartbeat; a quiet 5 seconds emits a keepalive instead.
//! There is no explicit exit: the generator lives until the transport
//! drops the response stream, which drops the pending pop with it.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::time::Instant;

use crate::event_broker::EventBroker;
use crate::models::EventEnvelope;

/// Reconnect-delay hint sent on open, in milliseconds.
pub const RETRY_HINT_MS: u64 = 3000;

const POP_TIMEOUT_SECS: u64 = 5;
const KEEPALIVE_AFTER: Duration = Duration::from_secs(5);

/// One emission of the per-client state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Reconnect-delay hint, sent once on open.
    Retry,
    /// A delivered queue message.
    Message(EventEnvelope),
    /// Heartbeat after a quiet interval.
    Keepalive,
}

/// Event stream for one connected player client.
pub fn player_event_stream(
    broker: Arc<EventBroker>,
    player_id: String,
) -> impl Stream<Item = StreamEvent> {
    async_stream::stream! {
        tracing::debug!(player_id = %player_id, "SSE stream opened");
        yield StreamEvent::Retry;

        let mut last_beat = Instant::now();
        loop {
            match broker.blocking_pop(&player_id, POP_TIMEOUT_SECS).await {
                Some(envelope) => {
                    last_beat = Instant::now();
                    yield StreamEvent::Message(envelope);
                }
                None => {
                    if last_beat.elapsed() >= KEEPALIVE_AFTER {
                        last_beat = Instant::now();
                        yield StreamEvent::Keepalive;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventType;
    use crate::state_store::MemoryStore;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_retry_then_message() {
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(EventBroker::sse(store));
        broker
            .publish("p-1", EventType::TriggerStart, json!({"id": "t-1"}))
            .await;

        let stream = player_event_stream(broker, "p-1".to_string());
        futures::pin_mut!(stream);

        assert_eq!(stream.next().await, Some(StreamEvent::Retry));
        match stream.next().await {
            Some(StreamEvent::Message(envelope)) => {
                assert_eq!(envelope.event_type, "event.triggerStart");
                assert_eq!(envelope.data["id"], "t-1");
            }
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_after_silence() {
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(EventBroker::sse(store));

        let stream = player_event_stream(broker, "p-1".to_string());
        futures::pin_mut!(stream);

        assert_eq!(stream.next().await, Some(StreamEvent::Retry));
        // Empty queue: the 5 s pop times out and the heartbeat fires
        assert_eq!(stream.next().await, Some(StreamEvent::Keepalive));
        assert_eq!(stream.next().await, Some(StreamEvent::Keepalive));
    }

    #[tokio::test]
    async fn test_message_resets_heartbeat() {
        let store = Arc::new(MemoryStore::new());
        let broker = Arc::new(EventBroker::sse(store));
        broker
            .publish("p-1", EventType::TriggerEnd, json!({"id": "t-1"}))
            .await;

        let stream = player_event_stream(broker.clone(), "p-1".to_string());
        futures::pin_mut!(stream);

        assert_eq!(stream.next().await, Some(StreamEvent::Retry));
        assert!(matches!(
            stream.next().await,
            Some(StreamEvent::Message(_))
        ));
    }
}
