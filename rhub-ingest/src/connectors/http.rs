//! Shared HTTP plumbing for agency connectors
//!
//! Every connector talks to its agency through this helper: one reqwest
//! client with a pinned User-Agent and timeout, one governor rate limiter
//! sized to the agency's published request limit, and uniform mapping of
//! transport failures onto the `FetchError` taxonomy.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use std::num::NonZeroU32;
use std::time::Duration;

use crate::types::FetchError;

/// User-Agent sent to every agency endpoint
const USER_AGENT: &str = "RecallHub/0.1 (ingestion; contact: ops@recallhub.example)";

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client + per-source rate limiter bundle
pub struct SourceHttp {
    client: Client,
    limiter: DefaultDirectRateLimiter,
    /// Backoff applied on 429 responses without a Retry-After header
    default_backoff: Duration,
}

impl SourceHttp {
    /// Build a client limited to `requests_per_minute` against one agency
    pub fn new(requests_per_minute: u32, default_backoff: Duration) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        Self {
            client: Client::builder()
                .timeout(DEFAULT_TIMEOUT)
                .user_agent(USER_AGENT)
                .build()
                .expect("Failed to create HTTP client"),
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
            default_backoff,
        }
    }

    /// GET a JSON document, honoring the rate limiter
    pub async fn get_json(&self, url: &str) -> Result<serde_json::Value, FetchError> {
        self.limiter.until_ready().await;

        tracing::debug!(url = %url, "Fetching source page");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::from_status(
                status,
                &body,
                retry_after,
                self.default_backoff,
            ));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| FetchError::SchemaChanged(format!("response is not JSON: {}", e)))
    }
}

/// Pull the record array out of a listing payload
///
/// A missing or non-array value means the source reshaped its response:
/// that is schema drift, not a transient failure.
pub fn expect_array<'a>(
    payload: &'a serde_json::Value,
    pointer: &str,
) -> Result<&'a Vec<serde_json::Value>, FetchError> {
    payload
        .pointer(pointer)
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            FetchError::SchemaChanged(format!("expected array at {:?} in listing response", pointer))
        })
}

/// Pull a record's native id out of an item
pub fn expect_id(item: &serde_json::Value, pointer: &str) -> Result<String, FetchError> {
    match item.pointer(pointer) {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        _ => Err(FetchError::SchemaChanged(format!(
            "expected record id at {:?}",
            pointer
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expect_array_rejects_reshaped_listing() {
        let payload = serde_json::json!({"results": {"unexpected": "object"}});
        assert!(matches!(
            expect_array(&payload, "/results"),
            Err(FetchError::SchemaChanged(_))
        ));

        let payload = serde_json::json!({"results": [1, 2]});
        assert_eq!(expect_array(&payload, "/results").unwrap().len(), 2);
    }

    #[test]
    fn expect_id_accepts_strings_and_numbers() {
        let item = serde_json::json!({"RecallID": 24105});
        assert_eq!(expect_id(&item, "/RecallID").unwrap(), "24105");

        let item = serde_json::json!({"RecallID": " 24-105 "});
        assert_eq!(expect_id(&item, "/RecallID").unwrap(), "24-105");

        let item = serde_json::json!({"RecallID": null});
        assert!(expect_id(&item, "/RecallID").is_err());
    }
}
