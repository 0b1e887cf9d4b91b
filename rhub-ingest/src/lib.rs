//! rhub-ingest library interface
//!
//! Exposes the pipeline components and the HTTP router for integration
//! testing.

pub mod api;
pub mod config;
pub mod connectors;
pub mod db;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod models;
pub mod normalizer;
pub mod scheduler;
pub mod scoring;
pub mod search;
pub mod types;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::ingest::IngestOrchestrator;
use crate::search::SearchIndex;
use rhub_common::events::EventBus;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool (canonical store)
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Search index snapshot
    pub search: Arc<SearchIndex>,
    /// Pipeline orchestrator
    pub orchestrator: Arc<IngestOrchestrator>,
    /// Cancellation tokens for runs executing in this process
    pub cancellation_tokens: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        search: Arc<SearchIndex>,
        orchestrator: Arc<IngestOrchestrator>,
    ) -> Self {
        Self {
            db,
            event_bus,
            search,
            orchestrator,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::ingest_routes())
        .merge(api::query_routes())
        .merge(api::ops_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
