//! RealtimeHub - Persistent Socket Transport
//!
//! ## Responsibilities
//!
//! - WebSocket connection registry (connection -> optional bound player)
//! - Player protocol handling (`player.hello`, `player.state`,
//!   `player.triggers`) with ack/error replies
//! - Shared periodic drain of each bound player's socket queue
//!
//! Registry entries are mutated only by handlers on their own
//! connection. The drain timer is one task for all connections and does
//! bounded work per tick per connection: up to `max_per_tick` messages,
//! and a failed send stops that connection's drain for the tick while
//! the rest stay queued. Slow consumers fall behind in the store, they
//! never stall the timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::event_broker::EventBroker;
use crate::models::{ContentRef, EventEnvelope, PlayerState};
use crate::player_directory::PlayerDirectory;

const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_MAX_PER_TICK: usize = 10;

/// One live connection.
struct PlayerConnection {
    player_id: Option<String>,
    tx: mpsc::UnboundedSender<String>,
}

/// Hub over all live socket connections.
pub struct RealtimeHub {
    connections: RwLock<HashMap<Uuid, PlayerConnection>>,
    directory: Arc<PlayerDirectory>,
    broker: Arc<EventBroker>,
    running: RwLock<bool>,
}

impl RealtimeHub {
    pub fn new(directory: Arc<PlayerDirectory>, broker: Arc<EventBroker>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            directory,
            broker,
            running: RwLock::new(false),
        }
    }

    /// Register a new connection; messages for it arrive on the receiver.
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut connections = self.connections.write().await;
        connections.insert(
            id,
            PlayerConnection {
                player_id: None,
                tx,
            },
        );

        tracing::debug!(
            connection_id = %id,
            total_connections = connections.len(),
            "Socket connection opened"
        );

        (id, rx)
    }

    /// Remove a closed connection. Queued messages for its player stay in
    /// the store and are delivered on reconnect.
    pub async fn unregister(&self, id: &Uuid) {
        let mut connections = self.connections.write().await;
        if let Some(conn) = connections.remove(id) {
            tracing::debug!(
                connection_id = %id,
                player_id = conn.player_id.as_deref().unwrap_or(""),
                remaining_connections = connections.len(),
                "Socket connection closed"
            );
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Handle one inbound text message on a connection.
    pub async fn handle_message(&self, conn_id: &Uuid, text: &str) {
        let parsed: Value = match serde_json::from_str(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(connection_id = %conn_id, error = %e, "Invalid JSON in socket message");
                return;
            }
        };

        let message_type = parsed.get("type").and_then(Value::as_str).unwrap_or("");
        let data = parsed.get("data").cloned().unwrap_or(Value::Null);

        match message_type {
            "player.hello" => self.handle_hello(conn_id, &data).await,
            "player.state" => self.handle_state(conn_id, &data).await,
            "player.triggers" => self.handle_triggers(conn_id, &data).await,
            other => {
                tracing::debug!(
                    message_type = %other,
                    connection_id = %conn_id,
                    "Unknown socket message type"
                );
            }
        }
    }

    async fn handle_hello(&self, conn_id: &Uuid, data: &Value) {
        let player_id = data.get("playerId").and_then(Value::as_str).unwrap_or("");
        if !player_id.is_empty() {
            self.bind(conn_id, player_id).await;
            tracing::info!(
                player_id = %player_id,
                connection_id = %conn_id,
                "Player connected via socket"
            );
        }

        self.reply(conn_id, &EventEnvelope::ack("player.hello")).await;
    }

    async fn handle_state(&self, conn_id: &Uuid, data: &Value) {
        let player_id = data.get("playerId").and_then(Value::as_str).unwrap_or("");
        if !player_id.is_empty() {
            self.bind(conn_id, player_id).await;

            let content = data
                .get("content")
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(ContentRef::from_value).collect())
                .unwrap_or_default();
            let timestamp = data
                .get("timestamp")
                .and_then(Value::as_i64)
                .unwrap_or_else(|| chrono::Utc::now().timestamp());

            let state = PlayerState::new(player_id, content, timestamp);
            self.directory.set_state(player_id, &state).await;
        }

        self.reply(conn_id, &EventEnvelope::ack("player.state")).await;
    }

    async fn handle_triggers(&self, conn_id: &Uuid, data: &Value) {
        let player_id = data.get("playerId").and_then(Value::as_str).unwrap_or("");
        if player_id.is_empty() {
            tracing::warn!(connection_id = %conn_id, "Received player.triggers without playerId");
            return;
        }

        let Some(triggers) = data.get("triggers").and_then(Value::as_array) else {
            tracing::warn!(
                player_id = %player_id,
                connection_id = %conn_id,
                "Invalid triggers format"
            );
            return;
        };

        // A usable rule is an object carrying a non-empty string id
        let valid: Vec<Value> = triggers
            .iter()
            .filter(|rule| {
                let ok = rule
                    .get("id")
                    .and_then(Value::as_str)
                    .is_some_and(|id| !id.is_empty());
                if !ok {
                    tracing::warn!(player_id = %player_id, "Trigger missing id field");
                }
                ok
            })
            .cloned()
            .collect();
        let rejected = triggers.len() - valid.len();

        match self.directory.set_triggers(player_id, &valid).await {
            Ok(()) => {
                self.reply(
                    conn_id,
                    &EventEnvelope::ack_with(
                        "player.triggers",
                        serde_json::json!({
                            "accepted": valid.len(),
                            "rejected": rejected,
                        }),
                    ),
                )
                .await;
            }
            Err(e) => {
                tracing::error!(player_id = %player_id, error = %e, "Failed to save triggers");
                self.reply(
                    conn_id,
                    &EventEnvelope::error("player.triggers", "Failed to save triggers"),
                )
                .await;
            }
        }
    }

    async fn bind(&self, conn_id: &Uuid, player_id: &str) {
        let mut connections = self.connections.write().await;
        if let Some(conn) = connections.get_mut(conn_id) {
            conn.player_id = Some(player_id.to_string());
        }
    }

    async fn reply(&self, conn_id: &Uuid, envelope: &EventEnvelope) {
        let json = match serde_json::to_string(envelope) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(connection_id = %conn_id, error = %e, "Failed to encode reply");
                return;
            }
        };

        let connections = self.connections.read().await;
        if let Some(conn) = connections.get(conn_id) {
            if let Err(e) = conn.tx.send(json) {
                tracing::warn!(connection_id = %conn_id, error = %e, "Failed to send reply");
            }
        }
    }

    /// Start the shared drain timer with default interval and bound.
    pub fn start_drain(self: &Arc<Self>) {
        self.start_drain_with(DEFAULT_DRAIN_INTERVAL, DEFAULT_MAX_PER_TICK);
    }

    /// Start the shared drain timer.
    pub fn start_drain_with(self: &Arc<Self>, interval: Duration, max_per_tick: usize) {
        let hub = self.clone();
        tokio::spawn(async move {
            {
                let mut running = hub.running.write().await;
                if *running {
                    tracing::warn!("Drain timer already running");
                    return;
                }
                *running = true;
            }

            tracing::info!(
                interval_ms = interval.as_millis() as u64,
                max_per_tick = max_per_tick,
                "Socket drain timer started"
            );

            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if !*hub.running.read().await {
                    break;
                }
                hub.drain_all(max_per_tick).await;
            }

            tracing::info!("Socket drain timer stopped");
        });
    }

    /// Stop the drain timer after the current tick.
    pub async fn stop_drain(&self) {
        *self.running.write().await = false;
    }

    /// One drain pass over every bound connection.
    pub async fn drain_all(&self, max_per_tick: usize) {
        let targets: Vec<(Uuid, String, mpsc::UnboundedSender<String>)> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .filter_map(|(id, conn)| {
                    conn.player_id
                        .as_ref()
                        .map(|player_id| (*id, player_id.clone(), conn.tx.clone()))
                })
                .collect()
        };

        for (conn_id, player_id, tx) in targets {
            for _ in 0..max_per_tick {
                let Some(payload) = self.broker.pop_raw(&player_id).await else {
                    break;
                };
                if let Err(e) = tx.send(payload) {
                    tracing::warn!(
                        connection_id = %conn_id,
                        player_id = %player_id,
                        error = %e,
                        "Failed to send queued message, stopping drain for this tick"
                    );
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventType;
    use crate::state_store::{MemoryStore, StateStore as _};
    use serde_json::json;

    fn hub() -> (Arc<RealtimeHub>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let directory = Arc::new(PlayerDirectory::new(store.clone()));
        let broker = Arc::new(EventBroker::socket(store.clone()));
        (Arc::new(RealtimeHub::new(directory, broker)), store)
    }

    fn envelope(raw: &str) -> EventEnvelope {
        serde_json::from_str(raw).unwrap()
    }

    #[tokio::test]
    async fn test_hello_binds_and_acks() {
        let (hub, _store) = hub();
        let (conn_id, mut rx) = hub.register().await;

        hub.handle_message(
            &conn_id,
            &json!({"type": "player.hello", "data": {"playerId": "p-1"}}).to_string(),
        )
        .await;

        let reply = envelope(&rx.recv().await.unwrap());
        assert_eq!(reply.event_type, "event.ack");
        assert_eq!(reply.data["ref"], "player.hello");

        // Binding makes the connection drainable
        hub.broker
            .publish("p-1", EventType::TriggerStart, json!({"id": "t-1"}))
            .await;
        hub.drain_all(10).await;
        let delivered = envelope(&rx.recv().await.unwrap());
        assert_eq!(delivered.event_type, "event.triggerStart");
    }

    #[tokio::test]
    async fn test_state_overwrites_and_defaults_timestamp() {
        let (hub, store) = hub();
        let (conn_id, mut rx) = hub.register().await;

        hub.handle_message(
            &conn_id,
            &json!({
                "type": "player.state",
                "data": {
                    "playerId": "p-1",
                    "content": [{"contentId": "c-1", "contentType": "video"}, "junk"]
                }
            })
            .to_string(),
        )
        .await;

        let reply = envelope(&rx.recv().await.unwrap());
        assert_eq!(reply.data["ref"], "player.state");

        let directory = PlayerDirectory::new(store.clone());
        let state = directory.get_state("p-1").await.unwrap();
        assert_eq!(state.content.len(), 1);
        assert_eq!(state.content[0].content_id, "c-1");
        assert!(state.timestamp > 0);
    }

    #[tokio::test]
    async fn test_triggers_validation_counts() {
        let (hub, store) = hub();
        let (conn_id, mut rx) = hub.register().await;

        hub.handle_message(
            &conn_id,
            &json!({
                "type": "player.triggers",
                "data": {
                    "playerId": "p-1",
                    "triggers": [
                        {"id": "t-1", "gender": "male"},
                        {"gender": "female"},
                        {"id": ""},
                        {"id": "t-2"}
                    ]
                }
            })
            .to_string(),
        )
        .await;

        let reply = envelope(&rx.recv().await.unwrap());
        assert_eq!(reply.event_type, "event.ack");
        assert_eq!(reply.data["accepted"], 2);
        assert_eq!(reply.data["rejected"], 2);

        let directory = PlayerDirectory::new(store.clone());
        let stored = directory.get_triggers("p-1").await.unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[tokio::test]
    async fn test_triggers_missing_player_id_no_reply() {
        let (hub, _store) = hub();
        let (conn_id, mut rx) = hub.register().await;

        hub.handle_message(
            &conn_id,
            &json!({"type": "player.triggers", "data": {"triggers": []}}).to_string(),
        )
        .await;
        hub.handle_message(
            &conn_id,
            &json!({"type": "player.triggers", "data": {"playerId": "p-1", "triggers": "nope"}})
                .to_string(),
        )
        .await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_and_invalid_messages_ignored() {
        let (hub, _store) = hub();
        let (conn_id, mut rx) = hub.register().await;

        hub.handle_message(&conn_id, "not json at all").await;
        hub.handle_message(&conn_id, &json!({"type": "player.reboot"}).to_string())
            .await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drain_bounded_per_tick() {
        let (hub, _store) = hub();
        let (conn_id, mut rx) = hub.register().await;
        hub.handle_message(
            &conn_id,
            &json!({"type": "player.hello", "data": {"playerId": "p-1"}}).to_string(),
        )
        .await;
        rx.recv().await.unwrap(); // ack

        for i in 0..12 {
            hub.broker
                .publish("p-1", EventType::TriggerStart, json!({"id": format!("t-{i}")}))
                .await;
        }

        hub.drain_all(10).await;
        let mut delivered = 0;
        while rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert_eq!(delivered, 10);

        // The remainder arrives on the next tick
        hub.drain_all(10).await;
        let mut rest = 0;
        while rx.try_recv().is_ok() {
            rest += 1;
        }
        assert_eq!(rest, 2);
    }

    #[tokio::test]
    async fn test_drain_skips_dead_connection_but_keeps_backlog() {
        let (hub, store) = hub();
        let (_unbound_id, _unbound_rx) = hub.register().await;
        let (conn_id, rx) = hub.register().await;
        hub.handle_message(
            &conn_id,
            &json!({"type": "player.hello", "data": {"playerId": "p-1"}}).to_string(),
        )
        .await;
        drop(rx); // client went away without unregistering yet

        hub.broker
            .publish("p-1", EventType::TriggerEnd, json!({"id": "t-1"}))
            .await;
        hub.broker
            .publish("p-1", EventType::TriggerEnd, json!({"id": "t-2"}))
            .await;

        hub.drain_all(10).await;

        // The first message was popped into the dead channel, the second
        // stays queued for reconnect
        let remaining = store.lpop("ws:queue:p-1").await.unwrap();
        assert!(remaining.is_some());
    }

    #[tokio::test]
    async fn test_unregister_removes_connection() {
        let (hub, _store) = hub();
        let (conn_id, _rx) = hub.register().await;
        assert_eq!(hub.connection_count().await, 1);
        hub.unregister(&conn_id).await;
        assert_eq!(hub.connection_count().await, 0);
    }
}
