//! HTTP API for the ingestion core
//!
//! Two logical interfaces for the (excluded) web layer and ops tooling:
//! trigger/inspect ingestion runs, and query the canonical dataset.

pub mod health;
pub mod ingest;
pub mod risk;
pub mod search;
pub mod sse;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

/// Ingestion control routes
pub fn ingest_routes() -> Router<AppState> {
    Router::new()
        .route("/ingest/start", post(ingest::start_ingestion))
        .route("/ingest/runs/:run_id", get(ingest::get_run_status))
        .route("/ingest/cancel/:run_id", post(ingest::cancel_run))
}

/// Query routes
pub fn query_routes() -> Router<AppState> {
    Router::new()
        .route("/search", get(search::search))
        .route("/risk/recalculate", post(risk::recalculate))
}

/// Liveness and event-stream routes
pub fn ops_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/events", get(sse::event_stream))
}
