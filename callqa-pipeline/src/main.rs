//! callqa-pipeline - Call QA Processing Service
//!
//! Ingests call recordings from the call-center platform, transcribes
//! them, runs rubric-based QA analysis against the LLM provider and keeps
//! the per-agent and per-question aggregates consistent.

use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use callqa_common::config as common_config;
use callqa_common::events::EventBus;
use callqa_pipeline::jobs::{Analyzer, Transcriber};
use callqa_pipeline::pipeline::PipelineScheduler;
use callqa_pipeline::services::{CallSyncService, PlatformClient};
use callqa_pipeline::{config, AppState};

const LISTEN_ADDR: &str = "127.0.0.1:5731";
const SYNC_INTERVAL_SECS: u64 = 600;

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting callqa-pipeline");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve the data folder and open the database.
    let data_folder = common_config::resolve_data_folder();
    common_config::ensure_data_folder(&data_folder)
        .map_err(|e| anyhow::anyhow!("Failed to initialize data folder: {}", e))?;

    let db_path = common_config::database_path(&data_folder);
    info!("Database: {}", db_path.display());
    let db = callqa_pipeline::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    let toml_config = common_config::load_toml_config()
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    let event_bus = EventBus::new(100);

    // External collaborators.
    let platform = Arc::new(
        PlatformClient::new(config::resolve_platform_config(&toml_config))
            .map_err(|e| anyhow::anyhow!("Failed to build platform client: {}", e))?,
    );
    let stt = config::build_stt_provider(&db, &toml_config).await?;
    let llm = config::build_llm_provider(&db, &toml_config).await?;

    // Pipeline workers and the scheduler.
    let transcriber = Arc::new(Transcriber::new(
        db.clone(),
        platform.clone(),
        stt,
        event_bus.clone(),
    ));
    let analyzer = Arc::new(Analyzer::new(db.clone(), llm, event_bus.clone()));

    let scheduler_config = config::scheduler_config(&toml_config);
    if !scheduler_config.enabled {
        info!("Pipeline disabled by configuration; scheduler will idle");
    }
    let scheduler = Arc::new(PipelineScheduler::new(
        db.clone(),
        event_bus.clone(),
        transcriber,
        analyzer,
        scheduler_config,
    ));

    let shutdown = CancellationToken::new();
    scheduler.clone().spawn_loop(shutdown.clone());

    // Ingestion sync against the platform.
    let sync = Arc::new(CallSyncService::new(
        db.clone(),
        platform,
        event_bus.clone(),
    ));
    sync.spawn_loop(
        std::time::Duration::from_secs(SYNC_INTERVAL_SECS),
        shutdown.clone(),
    );

    // HTTP API.
    let state = AppState::new(db, event_bus);
    let app = callqa_pipeline::build_router(state);

    let listener = tokio::net::TcpListener::bind(LISTEN_ADDR).await?;
    info!("Listening on http://{}", LISTEN_ADDR);
    info!("Health check: http://{}/health", LISTEN_ADDR);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
