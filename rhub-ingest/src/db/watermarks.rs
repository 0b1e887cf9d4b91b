//! Per-source watermark persistence
//!
//! A watermark only advances after the batch it covers has committed; the
//! advance happens outside the batch transaction, strictly after it. A crash
//! between commit and advance re-fetches the same window on the next run,
//! which the dedup short-circuit absorbs (at-least-once over at-most-once).

use chrono::Utc;
use sqlx::{Row, Sqlite, SqlitePool};

use rhub_common::Result;

/// Load the last successful cursor for a source
pub async fn get_watermark(pool: &SqlitePool, source_code: &str) -> Result<Option<String>> {
    let row = sqlx::query(
        "SELECT last_successful_cursor FROM source_watermarks WHERE source_code = ?",
    )
    .bind(source_code)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| r.get("last_successful_cursor")))
}

/// Advance the cursor for a source
pub async fn advance_watermark<'e, E>(executor: E, source_code: &str, cursor: &str) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO source_watermarks (source_code, last_successful_cursor, updated_at)
        VALUES (?, ?, ?)
        ON CONFLICT(source_code) DO UPDATE SET
            last_successful_cursor = excluded.last_successful_cursor,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(source_code)
    .bind(cursor)
    .bind(Utc::now().to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    #[tokio::test]
    async fn watermark_round_trip() {
        let pool = init_memory_pool().await.unwrap();

        assert_eq!(get_watermark(&pool, "cpsc").await.unwrap(), None);

        advance_watermark(&pool, "cpsc", "2024-01-10").await.unwrap();
        assert_eq!(
            get_watermark(&pool, "cpsc").await.unwrap(),
            Some("2024-01-10".to_string())
        );

        advance_watermark(&pool, "cpsc", "2024-02-01").await.unwrap();
        assert_eq!(
            get_watermark(&pool, "cpsc").await.unwrap(),
            Some("2024-02-01".to_string())
        );
    }
}
