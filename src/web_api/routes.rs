//! API Routes

use std::collections::HashMap;
use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::header::CONTENT_TYPE,
    http::HeaderMap,
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, Stream, StreamExt};
use serde_json::{json, Value};
use tower_http::decompression::RequestDecompressionLayer;

use crate::aggregation::{sort_frames_by_timestamp, BucketType};
use crate::models::{ContentRef, PlayerState};
use crate::state::AppState;
use crate::stream_consumer::{player_event_stream, StreamEvent, RETRY_HINT_MS};
use crate::{Error, Result};

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/api/health", get(super::health_check))
        // Frame ingestion (two aliases for firmware compatibility)
        .route("/api/v1/frames", post(ingest_frames))
        .route("/api/frames", post(ingest_frames))
        // Player state + polling transport
        .route("/api/player/state", post(update_player_state))
        .route("/api/player/stream", get(player_stream))
        // Dashboards
        .route("/api/dashboards/frames", get(dashboard_frames))
        // Persistent socket transport
        .route("/api/ws", get(websocket_handler))
        .layer(RequestDecompressionLayer::new())
        .with_state(state)
}

// ========================================
// Frame Ingestion
// ========================================

async fn ingest_frames(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json");

    let frames = parse_frame_records(content_type, &body);
    if frames.is_empty() {
        return Err(Error::Validation("No valid frames".to_string()));
    }

    let mut accepted = 0;
    for frame in &frames {
        let Some(payload) = state.ingest.process_frame(frame).await else {
            continue;
        };
        state.archive.forward(payload);
        accepted += 1;
    }

    if accepted == 0 {
        return Err(Error::Validation("All frames failed validation".to_string()));
    }
    Ok(Json(json!({"status": "ok", "accepted": accepted})))
}

/// Split a request body into frame records: one JSON document, or one
/// per line for NDJSON payloads.
fn parse_frame_records(content_type: &str, body: &str) -> Vec<Value> {
    if content_type.contains("application/x-ndjson") {
        body.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .filter(|v: &Value| v.is_object())
            .collect()
    } else {
        serde_json::from_str::<Value>(body)
            .ok()
            .filter(|v| v.is_object())
            .into_iter()
            .collect()
    }
}

// ========================================
// Player State + Polling Transport
// ========================================

async fn update_player_state(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>> {
    if body.get("type").and_then(Value::as_str) != Some("player.state") {
        return Err(Error::Validation("type must be player.state".to_string()));
    }
    let data = body.get("data").cloned().unwrap_or(Value::Null);

    let player_id = data
        .get("playerId")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Validation("data.playerId is required".to_string()))?;
    let timestamp = data
        .get("timestamp")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::Validation("data.timestamp is required".to_string()))?;
    let content = data
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Validation("data.content is required".to_string()))?;

    let mut refs = Vec::with_capacity(content.len());
    for item in content {
        let valid = item.get("contentId").and_then(Value::as_str).is_some()
            && item.get("contentType").and_then(Value::as_str).is_some();
        if !valid {
            return Err(Error::Validation(
                "content items need contentId and contentType".to_string(),
            ));
        }
        refs.extend(ContentRef::from_value(item));
    }

    let player_state = PlayerState::new(player_id, refs, timestamp);
    state.directory.set_state(player_id, &player_state).await;

    if let Some(camera_id) = params.get("cameraId").filter(|c| !c.is_empty()) {
        state.directory.bind_camera(camera_id, player_id).await;
    }

    Ok(Json(json!({
        "type": "event.ack",
        "data": {"ref": "player.state"},
    })))
}

async fn player_stream(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let player_id = params
        .get("playerId")
        .filter(|p| !p.is_empty())
        .cloned()
        .ok_or_else(|| Error::Validation("playerId required".to_string()))?;

    let stream = player_event_stream(state.sse_broker.clone(), player_id).map(|event| {
        Ok(match event {
            StreamEvent::Retry => Event::default().retry(Duration::from_millis(RETRY_HINT_MS)),
            StreamEvent::Message(envelope) => {
                let data =
                    serde_json::to_string(&envelope.data).unwrap_or_else(|_| "{}".to_string());
                Event::default().event(envelope.event_type).data(data)
            }
            StreamEvent::Keepalive => Event::default().event("keepalive").data("{}"),
        })
    });

    Ok(Sse::new(stream))
}

// ========================================
// Dashboards
// ========================================

async fn dashboard_frames(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response> {
    let start = required_filter(&params, "filter[start]")?;
    let end = required_filter(&params, "filter[end]")?;
    required_filter(&params, "filter[screenIds]")?;

    let return_raw = params
        .get("returnRawFrames")
        .map(|v| matches!(v.as_str(), "true" | "1"))
        .unwrap_or(false);
    let bucket_type = params
        .get("bucketType")
        .and_then(|b| BucketType::parse(b));

    // All query params travel to the archive as the filter set
    let mut frames = state.archive.fetch_frames(&params).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to fetch frames from archive");
        Error::Fetch("Failed to fetch frames from storage".to_string())
    })?;

    if return_raw {
        sort_frames_by_timestamp(&mut frames);
        return Ok(Json(json!({"frames": frames})).into_response());
    }

    let aggregation = state
        .aggregation
        .aggregate(&frames, start, end, bucket_type)
        .await?;
    Ok(Json(aggregation).into_response())
}

fn required_filter<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            Error::Validation(
                "Required filters: filter[start], filter[end], filter[screenIds]".to_string(),
            )
        })
}

// ========================================
// WebSocket Handler
// ========================================

/// WebSocket upgrade handler
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle WebSocket connection
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut rx) = state.hub.register().await;

    // Forward hub messages (acks + drained events) to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Feed inbound protocol messages into the hub
    let hub = state.hub.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => hub.handle_message(&conn_id, text.as_str()).await,
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    tracing::warn!(connection_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.hub.unregister(&conn_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_json_frame() {
        let frames = parse_frame_records("application/json", r#"{"timestamp": 1}"#);
        assert_eq!(frames.len(), 1);
        assert!(parse_frame_records("application/json", "garbage").is_empty());
        assert!(parse_frame_records("application/json", "[1, 2]").is_empty());
    }

    #[test]
    fn test_parse_ndjson_frames() {
        let body = "{\"timestamp\": 1}\r\n\r\n{\"timestamp\": 2}\nnot-json\n{\"timestamp\": 3}";
        let frames = parse_frame_records("application/x-ndjson", body);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[2]["timestamp"], 3);
    }

    #[test]
    fn test_required_filter() {
        let mut params = HashMap::new();
        assert!(required_filter(&params, "filter[start]").is_err());
        params.insert("filter[start]".to_string(), "".to_string());
        assert!(required_filter(&params, "filter[start]").is_err());
        params.insert("filter[start]".to_string(), "2026-01-01".to_string());
        assert_eq!(
            required_filter(&params, "filter[start]").unwrap(),
            "2026-01-01"
        );
    }
}
