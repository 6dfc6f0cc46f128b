//! Signage Audience Telemetry Gateway
//!
//! ## Architecture
//!
//! 1. StateStore - shared key/value service (Redis), the only persistence
//! 2. PlayerDirectory - player identity + player-scoped state
//! 3. TriggerEngine - audience-targeting evaluation state machine
//! 4. EventBroker - per-player, per-transport delivery queues
//! 5. StreamConsumer - polling (SSE) transport
//! 6. RealtimeHub - persistent socket transport + drain timer
//! 7. IngestPipeline - one-frame orchestration
//! 8. AggregationEngine - dashboard analytics with cached results
//! 9. FrameArchive - external archive adapter (fetch + forward)
//! 10. WebAPI - HTTP boundary

pub mod aggregation;
pub mod error;
pub mod event_broker;
pub mod frame_archive;
pub mod ingest_pipeline;
pub mod models;
pub mod player_directory;
pub mod realtime_hub;
pub mod state;
pub mod state_store;
pub mod stream_consumer;
pub mod trigger_engine;
pub mod web_api;

pub use error::{Error, Result};
pub use state::{AppConfig, AppState};
