//! Database retry logic
//!
//! Exponential backoff for transient database lock and busy errors. Batch
//! commits run through here; a commit that still fails after the budget
//! leaves the source's watermark untouched.

use std::time::{Duration, Instant};

use rhub_common::{Error, Result};

/// Retry a database operation with exponential backoff until `max_wait_ms`
/// elapses.
///
/// Only "database is locked"/"database is busy" errors are retried; any
/// other error returns immediately.
///
/// Backoff: initial 10ms, doubled per attempt, capped at 1000ms.
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait_ms: u64,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let max_duration = Duration::from_millis(max_wait_ms);
    let mut attempt = 0;
    let mut backoff_ms = 10u64;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) => {
                let is_lock_error = match &err {
                    Error::Database(db_err) => {
                        let msg = db_err.to_string();
                        msg.contains("database is locked") || msg.contains("database is busy")
                    }
                    _ => false,
                };

                if !is_lock_error {
                    return Err(err);
                }

                let elapsed = start_time.elapsed();
                if elapsed >= max_duration {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        max_wait_ms,
                        "Database operation failed: max retry time exceeded"
                    );
                    return Err(Error::Internal(format!(
                        "Database locked after {} attempts ({} ms elapsed, max {} ms)",
                        attempt,
                        elapsed.as_millis(),
                        max_wait_ms
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(1000);
            }
        }
    }
}
