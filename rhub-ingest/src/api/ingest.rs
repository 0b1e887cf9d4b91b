//! Ingestion control API handlers
//!
//! POST /ingest/start, GET /ingest/runs/{run_id}, POST /ingest/cancel/{run_id}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{IngestionRun, RunState};
use crate::AppState;

/// POST /ingest/start request
#[derive(Debug, Default, Deserialize)]
pub struct StartIngestionRequest {
    /// Source codes to ingest; empty or missing means every registered
    /// source
    #[serde(default)]
    pub sources: Option<Vec<String>>,
    /// Lookback window override for sources without a watermark
    #[serde(default)]
    pub lookback_days: Option<u32>,
}

/// POST /ingest/start response
#[derive(Debug, Serialize)]
pub struct StartIngestionResponse {
    pub run_id: Uuid,
    pub state: RunState,
    pub sources: Vec<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// POST /ingest/start
///
/// Enqueue a run and return 202 immediately; the run executes in a
/// background task. Calling repeatedly is safe: overlapping runs on the
/// same source serialize on that source's lock, and re-ingestion is
/// idempotent.
pub async fn start_ingestion(
    State(state): State<AppState>,
    Json(request): Json<StartIngestionRequest>,
) -> ApiResult<(StatusCode, Json<StartIngestionResponse>)> {
    let run = state
        .orchestrator
        .start_run(request.sources, request.lookback_days)
        .await
        .map_err(|e| match e {
            rhub_common::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Common(other),
        })?;

    let response = StartIngestionResponse {
        run_id: run.run_id,
        state: run.state,
        sources: run.sources.clone(),
        started_at: run.started_at,
    };

    let cancel = CancellationToken::new();
    state
        .cancellation_tokens
        .write()
        .await
        .insert(run.run_id, cancel.clone());

    tracing::info!(run_id = %run.run_id, "Ingestion run accepted");

    let orchestrator = state.orchestrator.clone();
    let tokens = state.cancellation_tokens.clone();
    tokio::spawn(async move {
        let run_id = run.run_id;
        if let Err(e) = orchestrator.execute_run(run, cancel).await {
            tracing::error!(run_id = %run_id, error = %e, "Ingestion run task failed");
        }
        tokens.write().await.remove(&run_id);
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /ingest/runs/{run_id}
///
/// Poll a run summary; live runs show the outcomes committed so far.
pub async fn get_run_status(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<IngestionRun>> {
    let run = crate::db::runs::load_run(&state.db, run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Ingestion run not found: {}", run_id)))?;
    Ok(Json(run))
}

/// POST /ingest/cancel/{run_id} response
#[derive(Debug, Serialize)]
pub struct CancelRunResponse {
    pub run_id: Uuid,
    pub cancelling: bool,
}

/// POST /ingest/cancel/{run_id}
///
/// Stop scheduling new source work for a run; in-flight source units
/// finish or hit their own timeout, and committed batches stay committed.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<CancelRunResponse>> {
    let run = crate::db::runs::load_run(&state.db, run_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Ingestion run not found: {}", run_id)))?;

    if run.is_terminal() {
        return Err(ApiError::BadRequest(format!(
            "Run already in terminal state: {:?}",
            run.state
        )));
    }

    let tokens = state.cancellation_tokens.read().await;
    match tokens.get(&run_id) {
        Some(token) => {
            token.cancel();
            tracing::info!(run_id = %run_id, "Run cancellation requested");
            Ok(Json(CancelRunResponse {
                run_id,
                cancelling: true,
            }))
        }
        // Persisted as running but owned by no live task (previous process)
        None => Err(ApiError::Conflict(
            "Run is not executing in this process".to_string(),
        )),
    }
}
