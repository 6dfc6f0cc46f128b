//! PlayerDirectory - Player Identity & Player-Scoped State
//!
//! ## Responsibilities
//!
//! - Resolve a stable player id from an explicit UUID or a camera binding
//! - Store/retrieve the player's current content-assignment state
//! - Store/retrieve the player's active trigger rule set
//! - Maintain the camera -> player binding map
//!
//! Everything here is best-effort: a store failure surfaces as "not
//! found" or a no-op so the ingestion path never dies on a directory
//! lookup. Only `set_triggers` reports failure upward, because the
//! socket transport answers it with an error envelope.

use std::sync::Arc;

use serde_json::Value;

use crate::models::PlayerState;
use crate::state_store::StateStore;
use crate::{Error, Result};

const STATE_KEY_PREFIX: &str = "player:state:";
const TRIGGERS_KEY_PREFIX: &str = "player:triggers:";
const CAMERA_MAP_KEY: &str = "camera:player";

/// Directory over the shared state store.
pub struct PlayerDirectory {
    store: Arc<dyn StateStore>,
}

impl PlayerDirectory {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Resolve a player id. An explicit UUID with known state wins over a
    /// camera binding; an unresolvable pair is `None`, never an error.
    pub async fn resolve_player(
        &self,
        camera_id: Option<&str>,
        player_uuid: Option<&str>,
    ) -> Option<String> {
        if let Some(uuid) = player_uuid {
            if self.get_state(uuid).await.is_some() {
                return Some(uuid.to_string());
            }
        }

        if let Some(camera_id) = camera_id {
            match self.store.hget(CAMERA_MAP_KEY, camera_id).await {
                Ok(Some(player_id)) => return Some(player_id),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(camera_id = %camera_id, error = %e, "Store error resolving camera binding");
                }
            }
        }

        None
    }

    /// Get the player's current state, `None` on miss or any failure.
    pub async fn get_state(&self, player_id: &str) -> Option<PlayerState> {
        let key = format!("{STATE_KEY_PREFIX}{player_id}");
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(player_id = %player_id, error = %e, "Store error reading player state");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!(player_id = %player_id, error = %e, "Failed to decode player state");
                None
            }
        }
    }

    /// Overwrite the player's state wholesale; last writer wins.
    pub async fn set_state(&self, player_id: &str, state: &PlayerState) {
        let json = match serde_json::to_string(state) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(player_id = %player_id, error = %e, "Failed to encode player state");
                return;
            }
        };

        let key = format!("{STATE_KEY_PREFIX}{player_id}");
        if let Err(e) = self.store.set(&key, &json).await {
            tracing::error!(player_id = %player_id, error = %e, "Store error saving player state");
            return;
        }

        tracing::debug!(
            player_id = %player_id,
            content_count = state.content.len(),
            "Player state updated"
        );
    }

    /// Bind a camera to a player; last writer wins.
    pub async fn bind_camera(&self, camera_id: &str, player_id: &str) {
        if let Err(e) = self.store.hset(CAMERA_MAP_KEY, camera_id, player_id).await {
            tracing::error!(
                camera_id = %camera_id,
                player_id = %player_id,
                error = %e,
                "Store error binding camera"
            );
            return;
        }
        tracing::debug!(camera_id = %camera_id, player_id = %player_id, "Camera bound to player");
    }

    /// Get the player's active trigger rule set as raw rule objects.
    pub async fn get_triggers(&self, player_id: &str) -> Option<Vec<Value>> {
        let key = format!("{TRIGGERS_KEY_PREFIX}{player_id}");
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::error!(player_id = %player_id, error = %e, "Store error reading triggers");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(triggers) => Some(triggers),
            Err(e) => {
                tracing::warn!(player_id = %player_id, error = %e, "Failed to decode triggers");
                None
            }
        }
    }

    /// Replace the player's trigger rule set (full replace).
    pub async fn set_triggers(&self, player_id: &str, triggers: &[Value]) -> Result<()> {
        let json = serde_json::to_string(triggers)?;
        let key = format!("{TRIGGERS_KEY_PREFIX}{player_id}");
        self.store.set(&key, &json).await.map_err(|e| {
            tracing::error!(player_id = %player_id, error = %e, "Store error saving triggers");
            Error::Store(e.to_string())
        })?;

        tracing::info!(
            player_id = %player_id,
            trigger_count = triggers.len(),
            "Player triggers updated"
        );
        Ok(())
    }
}
