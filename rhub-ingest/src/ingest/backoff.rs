//! Fetch retry/backoff policy
//!
//! One policy object parameterized by error kind, used by the orchestrator
//! for every source instead of per-connector retry loops. Transient errors
//! burn the bounded attempt budget with exponential backoff; RateLimited
//! honors the source-declared hint and is tallied separately so operators
//! can tell a slow source from a broken one; SchemaChanged and Auth stop
//! immediately.

use std::time::Duration;

use crate::config::IngestConfig;
use crate::types::{FetchError, FetchOutput, SourceConnector};

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max_delay: Duration,
    /// Total fetch attempts for transient errors (first try included)
    pub max_attempts: u32,
    /// Rate-limit waits honored before the source fails for the run
    pub max_rate_limit_waits: u32,
}

impl BackoffPolicy {
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            base: Duration::from_millis(config.fetch_backoff_base_ms),
            max_delay: Duration::from_millis(config.fetch_backoff_max_ms),
            max_attempts: config.fetch_max_attempts.max(1),
            max_rate_limit_waits: config.max_rate_limit_waits,
        }
    }

    /// Exponential delay for the given retry ordinal (1-based)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max_delay)
    }
}

/// Retry bookkeeping surfaced into the source outcome
#[derive(Debug, Default, Clone, Copy)]
pub struct FetchStats {
    pub transient_retries: u32,
    pub rate_limited_waits: u32,
}

/// Drive one connector fetch through the policy
pub async fn fetch_with_retry(
    connector: &dyn SourceConnector,
    cursor: Option<&str>,
    policy: &BackoffPolicy,
) -> (Result<FetchOutput, FetchError>, FetchStats) {
    let mut stats = FetchStats::default();

    loop {
        match connector.fetch(cursor).await {
            Ok(output) => return (Ok(output), stats),

            Err(FetchError::RateLimited { retry_after })
                if stats.rate_limited_waits < policy.max_rate_limit_waits =>
            {
                stats.rate_limited_waits += 1;
                let wait = retry_after.min(policy.max_delay);
                tracing::warn!(
                    source = connector.source_code(),
                    wait_ms = wait.as_millis() as u64,
                    waits = stats.rate_limited_waits,
                    "Source rate limited, honoring backoff hint"
                );
                tokio::time::sleep(wait).await;
            }

            Err(FetchError::Transient(msg))
                if stats.transient_retries + 1 < policy.max_attempts =>
            {
                stats.transient_retries += 1;
                let delay = policy.delay_for_retry(stats.transient_retries);
                tracing::warn!(
                    source = connector.source_code(),
                    error = %msg,
                    retry = stats.transient_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Transient fetch error, will retry"
                );
                tokio::time::sleep(delay).await;
            }

            Err(err) => return (Err(err), stats),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConnectorCaps, RawRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_policy() -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            max_attempts: 3,
            max_rate_limit_waits: 2,
        }
    }

    /// Connector that fails `failures` times before succeeding
    struct FlakyConnector {
        failures: u32,
        calls: AtomicU32,
        error: fn() -> FetchError,
    }

    impl FlakyConnector {
        fn new(failures: u32, error: fn() -> FetchError) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
                error,
            }
        }
    }

    #[async_trait]
    impl SourceConnector for FlakyConnector {
        fn source_code(&self) -> &'static str {
            "flaky"
        }

        fn caps(&self) -> ConnectorCaps {
            ConnectorCaps {
                incremental_fetch: true,
                fetch_by_id: false,
            }
        }

        async fn fetch(&self, _cursor: Option<&str>) -> Result<FetchOutput, FetchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err((self.error)())
            } else {
                Ok(FetchOutput {
                    records: vec![RawRecord::new("1", serde_json::json!({"ok": true}))],
                    next_cursor: "2024-01-01".to_string(),
                })
            }
        }
    }

    #[tokio::test]
    async fn transient_errors_retry_up_to_budget() {
        let connector =
            FlakyConnector::new(2, || FetchError::Transient("connection reset".into()));
        let (result, stats) = fetch_with_retry(&connector, None, &test_policy()).await;
        assert!(result.is_ok());
        assert_eq!(stats.transient_retries, 2);
    }

    #[tokio::test]
    async fn transient_budget_exhaustion_fails() {
        let connector =
            FlakyConnector::new(10, || FetchError::Transient("connection reset".into()));
        let (result, stats) = fetch_with_retry(&connector, None, &test_policy()).await;
        assert!(matches!(result, Err(FetchError::Transient(_))));
        // max_attempts=3 means two retries after the first try
        assert_eq!(stats.transient_retries, 2);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rate_limits_do_not_consume_transient_budget() {
        let connector = FlakyConnector::new(2, || FetchError::RateLimited {
            retry_after: Duration::from_millis(1),
        });
        let (result, stats) = fetch_with_retry(&connector, None, &test_policy()).await;
        assert!(result.is_ok());
        assert_eq!(stats.rate_limited_waits, 2);
        assert_eq!(stats.transient_retries, 0);
    }

    #[tokio::test]
    async fn schema_drift_never_retries() {
        let connector = FlakyConnector::new(10, || FetchError::SchemaChanged("reshaped".into()));
        let (result, _) = fetch_with_retry(&connector, None, &test_policy()).await;
        assert!(matches!(result, Err(FetchError::SchemaChanged(_))));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auth_failure_never_retries() {
        let connector = FlakyConnector::new(10, || FetchError::Auth("key revoked".into()));
        let (result, _) = fetch_with_retry(&connector, None, &test_policy()).await;
        assert!(matches!(result, Err(FetchError::Auth(_))));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let policy = BackoffPolicy {
            base: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            max_attempts: 5,
            max_rate_limit_waits: 1,
        };
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_retry(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_retry(10), Duration::from_millis(350));
    }
}
