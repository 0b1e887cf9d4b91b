//! Ingestion configuration resolution
//!
//! Tuning parameters resolve Database → ENV → compiled default, so an
//! operator can adjust thresholds at runtime through the settings table and
//! a deployment can pin values through the environment.

use sqlx::SqlitePool;
use std::str::FromStr;

use crate::db::settings::get_setting;
use rhub_common::Result;

/// Runtime configuration for the ingestion core
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Max per-source units in flight at once
    pub max_concurrent_sources: usize,
    /// Per-source wall-clock budget; an expired unit is failed-for-run
    pub source_timeout_secs: u64,
    /// Transient fetch attempts before a source fails for the run
    pub fetch_max_attempts: u32,
    /// First transient backoff delay
    pub fetch_backoff_base_ms: u64,
    /// Backoff ceiling (also caps rate-limit hints)
    pub fetch_backoff_max_ms: u64,
    /// Rate-limit waits honored before giving up on a source
    pub max_rate_limit_waits: u32,
    /// Budget for commit retries on lock contention
    pub commit_max_wait_ms: u64,
    /// Window for sources without a stored watermark
    pub lookback_days: u32,
    /// Dedup pair score at or above which records merge
    pub merge_threshold: f64,
    /// Dedup pair score below which a merge is flagged ambiguous
    pub flag_threshold: f64,
    /// Full ingestion cycle cadence
    pub ingest_interval_hours: u64,
    /// Risk recalculation cadence
    pub risk_interval_hours: u64,
    /// Default search similarity floor (recall-over-precision)
    pub search_min_similarity: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sources: 4,
            source_timeout_secs: 300,
            fetch_max_attempts: 4,
            fetch_backoff_base_ms: 1000,
            fetch_backoff_max_ms: 60_000,
            max_rate_limit_waits: 3,
            commit_max_wait_ms: 5000,
            lookback_days: 90,
            merge_threshold: 0.82,
            flag_threshold: 0.90,
            ingest_interval_hours: 72,
            risk_interval_hours: 24,
            search_min_similarity: 0.5,
        }
    }
}

impl IngestConfig {
    /// Resolve the configuration against the settings table and environment
    pub async fn load(pool: &SqlitePool) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_concurrent_sources: resolve(
                pool,
                "ingest.max_concurrent_sources",
                "RHUB_MAX_CONCURRENT_SOURCES",
                defaults.max_concurrent_sources,
            )
            .await?,
            source_timeout_secs: resolve(
                pool,
                "ingest.source_timeout_secs",
                "RHUB_SOURCE_TIMEOUT_SECS",
                defaults.source_timeout_secs,
            )
            .await?,
            fetch_max_attempts: resolve(
                pool,
                "ingest.fetch_max_attempts",
                "RHUB_FETCH_MAX_ATTEMPTS",
                defaults.fetch_max_attempts,
            )
            .await?,
            fetch_backoff_base_ms: resolve(
                pool,
                "ingest.fetch_backoff_base_ms",
                "RHUB_FETCH_BACKOFF_BASE_MS",
                defaults.fetch_backoff_base_ms,
            )
            .await?,
            fetch_backoff_max_ms: resolve(
                pool,
                "ingest.fetch_backoff_max_ms",
                "RHUB_FETCH_BACKOFF_MAX_MS",
                defaults.fetch_backoff_max_ms,
            )
            .await?,
            max_rate_limit_waits: resolve(
                pool,
                "ingest.max_rate_limit_waits",
                "RHUB_MAX_RATE_LIMIT_WAITS",
                defaults.max_rate_limit_waits,
            )
            .await?,
            commit_max_wait_ms: resolve(
                pool,
                "ingest.commit_max_wait_ms",
                "RHUB_COMMIT_MAX_WAIT_MS",
                defaults.commit_max_wait_ms,
            )
            .await?,
            lookback_days: resolve(
                pool,
                "ingest.lookback_days",
                "RHUB_LOOKBACK_DAYS",
                defaults.lookback_days,
            )
            .await?,
            merge_threshold: resolve(
                pool,
                "dedup.merge_threshold",
                "RHUB_MERGE_THRESHOLD",
                defaults.merge_threshold,
            )
            .await?,
            flag_threshold: resolve(
                pool,
                "dedup.flag_threshold",
                "RHUB_FLAG_THRESHOLD",
                defaults.flag_threshold,
            )
            .await?,
            ingest_interval_hours: resolve(
                pool,
                "scheduler.ingest_interval_hours",
                "RHUB_INGEST_INTERVAL_HOURS",
                defaults.ingest_interval_hours,
            )
            .await?,
            risk_interval_hours: resolve(
                pool,
                "scheduler.risk_interval_hours",
                "RHUB_RISK_INTERVAL_HOURS",
                defaults.risk_interval_hours,
            )
            .await?,
            search_min_similarity: resolve(
                pool,
                "search.min_similarity",
                "RHUB_SEARCH_MIN_SIMILARITY",
                defaults.search_min_similarity,
            )
            .await?,
        })
    }
}

/// One-key resolution: settings table, then environment, then default
async fn resolve<T: FromStr>(
    pool: &SqlitePool,
    key: &str,
    env_key: &str,
    default: T,
) -> Result<T> {
    if let Some(value) = get_setting(pool, key).await?.and_then(|v| v.parse().ok()) {
        return Ok(value);
    }
    if let Ok(raw) = std::env::var(env_key) {
        if let Ok(value) = raw.parse() {
            return Ok(value);
        }
        tracing::warn!(key = env_key, value = %raw, "Ignoring unparseable environment override");
    }
    Ok(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_memory_pool, settings::set_setting};

    #[tokio::test]
    async fn defaults_apply_without_settings() {
        let pool = init_memory_pool().await.unwrap();
        let config = IngestConfig::load(&pool).await.unwrap();
        assert_eq!(config.max_concurrent_sources, 4);
        assert!((config.merge_threshold - 0.82).abs() < f64::EPSILON);
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn environment_overrides_defaults_but_not_settings() {
        let pool = init_memory_pool().await.unwrap();
        std::env::set_var("RHUB_MERGE_THRESHOLD", "0.70");

        let config = IngestConfig::load(&pool).await.unwrap();
        assert!((config.merge_threshold - 0.70).abs() < f64::EPSILON);

        // The settings table stays authoritative over the environment
        set_setting(&pool, "dedup.merge_threshold", "0.85").await.unwrap();
        let config = IngestConfig::load(&pool).await.unwrap();
        assert!((config.merge_threshold - 0.85).abs() < f64::EPSILON);

        std::env::remove_var("RHUB_MERGE_THRESHOLD");
    }

    #[tokio::test]
    async fn settings_table_overrides_defaults() {
        let pool = init_memory_pool().await.unwrap();
        set_setting(&pool, "dedup.merge_threshold", "0.75").await.unwrap();
        set_setting(&pool, "ingest.max_concurrent_sources", "8")
            .await
            .unwrap();

        let config = IngestConfig::load(&pool).await.unwrap();
        assert!((config.merge_threshold - 0.75).abs() < f64::EPSILON);
        assert_eq!(config.max_concurrent_sources, 8);
    }
}
