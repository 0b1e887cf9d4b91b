//! Core Types and Trait Definitions for the Ingestion Pipeline
//!
//! Defines the base trait for the source tier and the raw-record shapes
//! flowing through the pipeline:
//! - **Source tier:** `SourceConnector` (one per regulatory agency)
//! - **Normalize tier:** raw payload → canonical draft (see `normalizer`)
//! - **Merge tier:** drafts → canonical rows (see `dedup`)
//!
//! All connectors run inside independently isolated per-source units; one
//! connector's failure never propagates past its own unit.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Capability flags declared by each connector
///
/// Connectors without incremental fetch always pull a fixed lookback window
/// and return the window end as the new cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorCaps {
    /// Source supports fetching only records changed since a cursor
    pub incremental_fetch: bool,
    /// Source supports fetching a single record by its native id
    pub fetch_by_id: bool,
}

/// A single record in source-native shape
///
/// `content_hash` is a SHA-256 over the canonicalized payload, used to
/// short-circuit re-ingestion of unchanged records.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// Record identifier in the source's own namespace
    pub source_record_id: String,
    /// Payload exactly as the source returned it
    pub payload: serde_json::Value,
    /// SHA-256 hex digest of the payload
    pub content_hash: String,
}

impl RawRecord {
    /// Build a raw record, hashing the payload
    pub fn new(source_record_id: impl Into<String>, payload: serde_json::Value) -> Self {
        let content_hash = hash_payload(&payload);
        Self {
            source_record_id: source_record_id.into(),
            payload,
            content_hash,
        }
    }
}

/// Hash a payload for change detection
///
/// serde_json preserves object ordering (preserve_order is off, maps are
/// BTree-backed), so serialization is stable for identical payloads.
pub fn hash_payload(payload: &serde_json::Value) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// Output of one connector fetch
#[derive(Debug, Clone)]
pub struct FetchOutput {
    /// Zero or more raw records in source-native shape
    pub records: Vec<RawRecord>,
    /// Cursor to persist once this batch is durably committed
    pub next_cursor: String,
}

/// Connector fetch error taxonomy
///
/// The orchestrator's retry policy dispatches on these variants; connectors
/// must map their native failures onto them rather than invent new kinds.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network/timeout class failure, retryable with backoff
    #[error("transient fetch error: {0}")]
    Transient(String),

    /// Source asked us to slow down; honor the declared hint
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Response no longer matches the expected shape; source is disabled
    /// for the remainder of the run and an alert is raised
    #[error("source schema changed: {0}")]
    SchemaChanged(String),

    /// Credentials rejected; non-retryable, alert raised
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl FetchError {
    /// Map a reqwest failure onto the taxonomy
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            FetchError::Transient(err.to_string())
        } else if err.is_decode() {
            FetchError::SchemaChanged(err.to_string())
        } else {
            FetchError::Transient(err.to_string())
        }
    }

    /// Map an HTTP status onto the taxonomy
    ///
    /// `retry_after` carries the parsed Retry-After header when present;
    /// sources without one fall back to their declared default hint.
    pub fn from_status(
        status: reqwest::StatusCode,
        body: &str,
        retry_after: Option<Duration>,
        default_backoff: Duration,
    ) -> Self {
        match status.as_u16() {
            401 | 403 => FetchError::Auth(format!("HTTP {}: {}", status, truncate(body, 200))),
            429 => FetchError::RateLimited {
                retry_after: retry_after.unwrap_or(default_backoff),
            },
            500..=599 => FetchError::Transient(format!("HTTP {}", status)),
            _ => FetchError::SchemaChanged(format!("HTTP {}: {}", status, truncate(body, 200))),
        }
    }

    /// True for error kinds the fetch retry loop may retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_) | FetchError::RateLimited { .. })
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// A source of recall notices
///
/// One implementation per regulatory agency. Connectors are stateless
/// between invocations; the only side effect is the network call itself.
#[async_trait::async_trait]
pub trait SourceConnector: Send + Sync {
    /// Stable source code used as the registry key (e.g. "cpsc")
    fn source_code(&self) -> &'static str;

    /// Declared capabilities
    fn caps(&self) -> ConnectorCaps;

    /// Fetch records changed since `cursor`
    ///
    /// `cursor` is `None` on the first run; connectors then fall back to
    /// their lookback window. The returned cursor is persisted by the
    /// orchestrator only after the batch commits.
    async fn fetch(&self, cursor: Option<&str>) -> Result<FetchOutput, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_payloads_hash_identically() {
        let a = serde_json::json!({"name": "Widget", "id": 7});
        let b = serde_json::json!({"name": "Widget", "id": 7});
        assert_eq!(hash_payload(&a), hash_payload(&b));
    }

    #[test]
    fn different_payloads_hash_differently() {
        let a = serde_json::json!({"name": "Widget"});
        let b = serde_json::json!({"name": "Gadget"});
        assert_ne!(hash_payload(&a), hash_payload(&b));
    }

    #[test]
    fn status_mapping_follows_taxonomy() {
        let rl = FetchError::from_status(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "",
            Some(Duration::from_secs(30)),
            Duration::from_secs(60),
        );
        match rl {
            FetchError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(30))
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }

        assert!(matches!(
            FetchError::from_status(
                reqwest::StatusCode::UNAUTHORIZED,
                "bad key",
                None,
                Duration::from_secs(60)
            ),
            FetchError::Auth(_)
        ));

        assert!(matches!(
            FetchError::from_status(
                reqwest::StatusCode::BAD_GATEWAY,
                "",
                None,
                Duration::from_secs(60)
            ),
            FetchError::Transient(_)
        ));
    }

    #[test]
    fn retryable_classification() {
        assert!(FetchError::Transient("x".into()).is_retryable());
        assert!(FetchError::RateLimited {
            retry_after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!FetchError::SchemaChanged("x".into()).is_retryable());
        assert!(!FetchError::Auth("x".into()).is_retryable());
    }
}
