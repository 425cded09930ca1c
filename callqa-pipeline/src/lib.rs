//! callqa-pipeline library interface
//!
//! Exposes the pipeline, store and API layers for the binary and for
//! integration testing.

pub mod api;
pub mod config;
pub mod controls;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod stats;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use callqa_common::events::EventBus;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus backing the SSE stream
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self {
            db,
            event_bus,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::call_routes())
        .merge(api::review_routes())
        .merge(api::stats_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .with_state(state)
}
