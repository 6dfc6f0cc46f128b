//! Signage audience telemetry gateway - main entry point

use std::sync::Arc;
use std::time::Duration;

use adgaze_server::aggregation::{AggregationConfig, AggregationEngine};
use adgaze_server::event_broker::EventBroker;
use adgaze_server::frame_archive::{ArchiveConfig, FrameArchive};
use adgaze_server::ingest_pipeline::IngestPipeline;
use adgaze_server::player_directory::PlayerDirectory;
use adgaze_server::realtime_hub::RealtimeHub;
use adgaze_server::state::{AppConfig, AppState};
use adgaze_server::state_store::{RedisStore, StateStore};
use adgaze_server::trigger_engine::TriggerEngine;
use adgaze_server::web_api;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adgaze_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting adgaze-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        redis_url = %config.redis_url,
        host = %config.host,
        port = config.port,
        trigger_throttle_ms = config.trigger_throttle_ms,
        "Configuration loaded"
    );

    // Connect the shared state store
    let store: Arc<dyn StateStore> = Arc::new(RedisStore::connect(&config.redis_url).await?);
    tracing::info!("State store connected");

    // Initialize components
    let directory = Arc::new(PlayerDirectory::new(store.clone()));
    let trigger_engine = Arc::new(TriggerEngine::new(
        store.clone(),
        config.trigger_throttle_ms,
        config.trigger_active_ttl_secs,
    ));
    let sse_broker = Arc::new(EventBroker::sse(store.clone()));
    let socket_broker = Arc::new(EventBroker::socket(store.clone()));
    let ingest = Arc::new(IngestPipeline::new(
        directory.clone(),
        trigger_engine,
        sse_broker.clone(),
        socket_broker.clone(),
    ));
    let aggregation = Arc::new(AggregationEngine::new(
        store.clone(),
        AggregationConfig {
            view_gap_sec: config.view_gap_sec,
            cache_ttl_secs: config.aggregation_cache_ttl_secs,
            max_frames: config.aggregation_max_frames,
        },
    ));
    let archive = Arc::new(FrameArchive::new(ArchiveConfig {
        query_url: config.archive_query_url.clone(),
        ingest_url: config.archive_ingest_url.clone(),
        bearer_token: config.archive_bearer_token.clone(),
    }));
    let hub = Arc::new(RealtimeHub::new(directory.clone(), socket_broker));
    tracing::info!("Components initialized");

    // Start the shared socket drain timer
    hub.start_drain_with(
        Duration::from_millis(config.drain_interval_ms),
        config.drain_max_per_tick,
    );

    // Create application state
    let state = AppState {
        config: config.clone(),
        directory,
        ingest,
        aggregation,
        sse_broker,
        hub,
        archive,
    };

    let app = web_api::create_router(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
