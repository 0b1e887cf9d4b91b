//! Risk recalculation API handler
//!
//! POST /risk/recalculate

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::ingest::{RecalcScope, RiskRecalcSummary};
use crate::AppState;

/// POST /risk/recalculate request
#[derive(Debug, Default, Deserialize)]
pub struct RecalculateRequest {
    /// "all" (default) or "changed_since"
    #[serde(default)]
    pub scope: Option<String>,
    /// Required when scope is "changed_since"
    #[serde(default)]
    pub changed_since: Option<DateTime<Utc>>,
}

/// POST /risk/recalculate
pub async fn recalculate(
    State(state): State<AppState>,
    Json(request): Json<RecalculateRequest>,
) -> ApiResult<Json<RiskRecalcSummary>> {
    let scope = match request.scope.as_deref() {
        None | Some("all") => RecalcScope::All,
        Some("changed_since") => {
            let since = request.changed_since.ok_or_else(|| {
                ApiError::BadRequest("changed_since timestamp required".to_string())
            })?;
            RecalcScope::ChangedSince(since)
        }
        Some(other) => {
            return Err(ApiError::BadRequest(format!("unknown scope: {}", other)))
        }
    };

    let summary = state.orchestrator.recalculate_risk(scope).await?;
    Ok(Json(summary))
}
