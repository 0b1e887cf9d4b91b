//! Runtime-tunable settings persistence
//!
//! Key/value table read with defaults. Dedup thresholds, concurrency bounds,
//! retry budgets and scheduler cadence all resolve through here so operators
//! can tune without redeploying.

use sqlx::SqlitePool;
use std::str::FromStr;

use rhub_common::Result;

/// Get a raw setting value
pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

/// Get a setting parsed into `T`, falling back to `default` when missing or
/// unparseable
pub async fn get_parsed<T: FromStr>(pool: &SqlitePool, key: &str, default: T) -> Result<T> {
    Ok(get_setting(pool, key)
        .await?
        .and_then(|v| v.parse().ok())
        .unwrap_or(default))
}

/// Set a setting value
pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;

    #[tokio::test]
    async fn parsed_setting_falls_back_to_default() {
        let pool = init_memory_pool().await.unwrap();

        let v: u32 = get_parsed(&pool, "ingest.max_concurrent_sources", 8).await.unwrap();
        assert_eq!(v, 8);

        set_setting(&pool, "ingest.max_concurrent_sources", "4").await.unwrap();
        let v: u32 = get_parsed(&pool, "ingest.max_concurrent_sources", 8).await.unwrap();
        assert_eq!(v, 4);

        set_setting(&pool, "ingest.max_concurrent_sources", "not-a-number")
            .await
            .unwrap();
        let v: u32 = get_parsed(&pool, "ingest.max_concurrent_sources", 8).await.unwrap();
        assert_eq!(v, 8);
    }
}
