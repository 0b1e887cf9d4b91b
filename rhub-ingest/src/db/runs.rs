//! Ingestion run persistence
//!
//! The run summary is saved at start, after every source outcome, and at
//! finish, so an operator polling the status endpoint sees live progress and
//! a crash still leaves the partial summary behind.

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::models::{IngestionRun, RunState, SourceOutcome};
use rhub_common::{Error, Result};

/// Save (insert or update) an ingestion run summary
pub async fn save_run(pool: &SqlitePool, run: &IngestionRun) -> Result<()> {
    let state = serde_json::to_string(&run.state)
        .map_err(|e| Error::Internal(format!("Failed to serialize run state: {}", e)))?;
    let sources = serde_json::to_string(&run.sources)
        .map_err(|e| Error::Internal(format!("Failed to serialize run sources: {}", e)))?;
    let outcomes = serde_json::to_string(&run.outcomes)
        .map_err(|e| Error::Internal(format!("Failed to serialize run outcomes: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO ingestion_runs (
            run_id, state, sources, lookback_days, outcomes, started_at, finished_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(run_id) DO UPDATE SET
            state = excluded.state,
            outcomes = excluded.outcomes,
            finished_at = excluded.finished_at
        "#,
    )
    .bind(run.run_id.to_string())
    .bind(state)
    .bind(sources)
    .bind(run.lookback_days as i64)
    .bind(outcomes)
    .bind(run.started_at.to_rfc3339())
    .bind(run.finished_at.map(|dt| dt.to_rfc3339()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Load an ingestion run summary
pub async fn load_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<IngestionRun>> {
    let row = sqlx::query("SELECT * FROM ingestion_runs WHERE run_id = ?")
        .bind(run_id.to_string())
        .fetch_optional(pool)
        .await?;

    match row {
        Some(row) => {
            let state: String = row.get("state");
            let state: RunState = serde_json::from_str(&state)
                .map_err(|e| Error::Internal(format!("Failed to deserialize run state: {}", e)))?;

            let sources: String = row.get("sources");
            let sources: Vec<String> = serde_json::from_str(&sources)
                .map_err(|e| Error::Internal(format!("Failed to deserialize run sources: {}", e)))?;

            let outcomes: String = row.get("outcomes");
            let outcomes: Vec<SourceOutcome> = serde_json::from_str(&outcomes)
                .map_err(|e| Error::Internal(format!("Failed to deserialize run outcomes: {}", e)))?;

            let started_at: String = row.get("started_at");
            let started_at = DateTime::parse_from_rfc3339(&started_at)
                .map_err(|e| Error::Internal(format!("Failed to parse started_at: {}", e)))?
                .with_timezone(&Utc);

            let finished_at: Option<String> = row.get("finished_at");
            let finished_at = finished_at
                .map(|s| DateTime::parse_from_rfc3339(&s))
                .transpose()
                .map_err(|e| Error::Internal(format!("Failed to parse finished_at: {}", e)))?
                .map(|dt| dt.with_timezone(&Utc));

            Ok(Some(IngestionRun {
                run_id,
                state,
                sources,
                lookback_days: row.get::<i64, _>("lookback_days") as u32,
                outcomes,
                started_at,
                finished_at,
            }))
        }
        None => Ok(None),
    }
}

/// Mark runs orphaned by a dead process
///
/// Any run not in a terminal state at startup belongs to a previous process
/// and will never progress; mark it cancelled so status queries don't show a
/// forever-running ghost. Committed batches from those runs stay committed.
pub async fn cleanup_stale_runs(pool: &SqlitePool) -> Result<usize> {
    let pending = serde_json::to_string(&RunState::Pending)
        .map_err(|e| Error::Internal(format!("Failed to serialize state: {}", e)))?;
    let running = serde_json::to_string(&RunState::Running)
        .map_err(|e| Error::Internal(format!("Failed to serialize state: {}", e)))?;
    let cancelled = serde_json::to_string(&RunState::Cancelled)
        .map_err(|e| Error::Internal(format!("Failed to serialize state: {}", e)))?;

    let result = sqlx::query(
        "UPDATE ingestion_runs SET state = ?, finished_at = ? WHERE state IN (?, ?)",
    )
    .bind(cancelled)
    .bind(Utc::now().to_rfc3339())
    .bind(pending)
    .bind(running)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    #[tokio::test]
    async fn run_round_trip() {
        let pool = init_memory_pool().await.unwrap();

        let mut run = IngestionRun::new(vec!["cpsc".into()], 90);
        run.transition_to(RunState::Running);
        save_run(&pool, &run).await.unwrap();

        run.outcomes.push(SourceOutcome {
            attempted: true,
            succeeded: true,
            records_fetched: 5,
            records_new: 3,
            records_merged: 2,
            ..SourceOutcome::not_attempted("cpsc")
        });
        run.finalize(false);
        save_run(&pool, &run).await.unwrap();

        let loaded = load_run(&pool, run.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, RunState::Completed);
        assert_eq!(loaded.outcomes.len(), 1);
        assert_eq!(loaded.outcomes[0].records_new, 3);
        assert!(loaded.finished_at.is_some());
    }

    #[tokio::test]
    async fn stale_runs_are_cancelled_on_cleanup() {
        let pool = init_memory_pool().await.unwrap();

        let mut orphan = IngestionRun::new(vec!["fda".into()], 30);
        orphan.transition_to(RunState::Running);
        save_run(&pool, &orphan).await.unwrap();

        let cleaned = cleanup_stale_runs(&pool).await.unwrap();
        assert_eq!(cleaned, 1);

        let loaded = load_run(&pool, orphan.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.state, RunState::Cancelled);
    }
}
