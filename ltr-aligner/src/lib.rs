//! ltr-aligner library interface
//!
//! Batch alignment orchestrator: plans batches over a parallel document pair,
//! runs them on a worker pool, and commits results in batch order.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use ltr_common::events::EventBus;
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

use crate::services::BatchProcessor;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Service database pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Run orchestration for every job
    pub processor: BatchProcessor,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, processor: BatchProcessor) -> Self {
        Self {
            db,
            event_bus,
            processor,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::alignment_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
