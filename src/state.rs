//! Application state
//!
//! Holds configuration and all shared components.

use std::sync::Arc;

use crate::aggregation::AggregationEngine;
use crate::event_broker::EventBroker;
use crate::frame_archive::FrameArchive;
use crate::ingest_pipeline::IngestPipeline;
use crate::player_directory::PlayerDirectory;
use crate::realtime_hub::RealtimeHub;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Redis URL for the shared state store
    pub redis_url: String,
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Minimum time between duplicate trigger starts (ms)
    pub trigger_throttle_ms: i64,
    /// TTL for active-trigger marks (seconds)
    pub trigger_active_ttl_secs: u64,
    /// Aggregation result cache TTL (seconds, 0 disables)
    pub aggregation_cache_ttl_secs: u64,
    /// Maximum frames accepted per aggregation query
    pub aggregation_max_frames: usize,
    /// Minimum gap between counted views of the same content (seconds)
    pub view_gap_sec: i64,
    /// Socket drain tick interval (ms)
    pub drain_interval_ms: u64,
    /// Maximum messages drained per connection per tick
    pub drain_max_per_tick: usize,
    /// Archive query endpoint (dashboards)
    pub archive_query_url: Option<String>,
    /// Archive ingest endpoint (frame forwarding)
    pub archive_ingest_url: Option<String>,
    /// Bearer token for the archive endpoints
    pub archive_bearer_token: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            trigger_throttle_ms: env_parse("TRIGGER_THROTTLE_MS", 300),
            trigger_active_ttl_secs: env_parse("TRIGGER_ACTIVE_TTL_SEC", 3600),
            aggregation_cache_ttl_secs: env_parse("AGGREGATION_CACHE_TTL", 300),
            aggregation_max_frames: env_parse("AGGREGATION_MAX_FRAMES", 10_000),
            view_gap_sec: env_parse("IMPRESSION_GAP_SEC", 5),
            drain_interval_ms: env_parse("WS_DRAIN_INTERVAL_MS", 500),
            drain_max_per_tick: env_parse("WS_DRAIN_MAX_PER_TICK", 10),
            archive_query_url: std::env::var("ARCHIVE_QUERY_URL").ok(),
            archive_ingest_url: std::env::var("ARCHIVE_INGEST_URL").ok(),
            archive_bearer_token: std::env::var("ARCHIVE_BEARER_TOKEN").ok(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application config
    pub config: AppConfig,
    /// PlayerDirectory (identity + player-scoped state)
    pub directory: Arc<PlayerDirectory>,
    /// IngestPipeline (frame orchestration)
    pub ingest: Arc<IngestPipeline>,
    /// AggregationEngine (dashboard analytics)
    pub aggregation: Arc<AggregationEngine>,
    /// SSE-side event broker (polling transport consumer half)
    pub sse_broker: Arc<EventBroker>,
    /// RealtimeHub (socket transport)
    pub hub: Arc<RealtimeHub>,
    /// FrameArchive (fetch + forward)
    pub archive: Arc<FrameArchive>,
}
