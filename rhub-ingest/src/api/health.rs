//! Health check handler

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::error::ApiResult;
use crate::AppState;

/// GET /health
pub async fn health(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let uptime_seconds = (chrono::Utc::now() - state.startup_time).num_seconds();
    let recalls = crate::db::recalls::count(&state.db).await?;
    Ok(Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime_seconds,
        "canonical_rows": recalls,
        "indexed_documents": state.search.len().await,
    })))
}
