//! Database access for the ingestion core
//!
//! SQLite via sqlx. Tables are created on startup; the canonical store is
//! the single source of truth read by the query layer.

pub mod recalls;
pub mod runs;
pub mod settings;
pub mod watermarks;

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory pool for tests
///
/// Capped at one connection: each `:memory:` connection is its own
/// database, so a wider pool would hand out empty databases.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create core tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS recalls (
            id TEXT PRIMARY KEY,
            source_agency TEXT NOT NULL,
            source_record_id TEXT NOT NULL,
            product_name TEXT NOT NULL,
            brand TEXT NOT NULL,
            model_numbers TEXT NOT NULL DEFAULT '[]',
            identifying_codes TEXT NOT NULL DEFAULT '[]',
            category TEXT NOT NULL,
            hazard_type TEXT NOT NULL,
            hazard_description TEXT NOT NULL,
            country TEXT NOT NULL,
            recall_date TEXT NOT NULL,
            risk_score INTEGER NOT NULL DEFAULT 0,
            match_confidence REAL NOT NULL DEFAULT 1.0,
            merged_from TEXT NOT NULL DEFAULT '[]',
            block_key TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_recalls_block_key ON recalls(block_key)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_recalls_updated_at ON recalls(updated_at)")
        .execute(pool)
        .await?;

    // Durable union-find closure: every seen raw record maps to exactly one
    // canonical row through this table.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS raw_record_index (
            source_agency TEXT NOT NULL,
            source_record_id TEXT NOT NULL,
            recall_id TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (source_agency, source_record_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_watermarks (
            source_code TEXT PRIMARY KEY,
            last_successful_cursor TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingestion_runs (
            run_id TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            sources TEXT NOT NULL,
            lookback_days INTEGER NOT NULL,
            outcomes TEXT NOT NULL DEFAULT '[]',
            started_at TEXT NOT NULL,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (recalls, raw_record_index, source_watermarks, ingestion_runs, settings)");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pool_creates_database_file_and_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("recallhub.db");

        let pool = init_database_pool(&db_path).await.unwrap();
        assert!(db_path.exists());

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM recalls")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }
}
