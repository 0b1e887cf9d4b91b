//! CPSC Connector
//!
//! Pulls recall notices from the US Consumer Product Safety Commission
//! recall REST API.
//!
//! # API Reference
//! - Endpoint: https://www.saferproducts.gov/RestWebServices/Recall
//! - Supports filtering by `RecallDateStart`, so incremental fetch is
//!   cursor-driven (cursor = last successful fetch date)
//! - No published hard rate limit; we stay at 30 requests/minute to be a
//!   polite client

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

use super::http::{expect_array, expect_id, SourceHttp};
use super::window_start;
use crate::types::{ConnectorCaps, FetchError, FetchOutput, RawRecord, SourceConnector};

const BASE_URL: &str = "https://www.saferproducts.gov/RestWebServices/Recall";
const REQUESTS_PER_MINUTE: u32 = 30;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(60);

pub struct CpscConnector {
    http: SourceHttp,
    lookback_days: u32,
}

impl CpscConnector {
    pub fn new(lookback_days: u32) -> Self {
        Self {
            http: SourceHttp::new(REQUESTS_PER_MINUTE, DEFAULT_BACKOFF),
            lookback_days,
        }
    }

    /// Map the listing payload onto raw records
    ///
    /// The endpoint returns a bare JSON array of recall objects.
    fn parse_items(payload: &serde_json::Value) -> Result<Vec<RawRecord>, FetchError> {
        let items = expect_array(payload, "")?;
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let id = expect_id(item, "/RecallID")?;
            records.push(RawRecord::new(id, item.clone()));
        }
        Ok(records)
    }
}

#[async_trait]
impl SourceConnector for CpscConnector {
    fn source_code(&self) -> &'static str {
        "cpsc"
    }

    fn caps(&self) -> ConnectorCaps {
        ConnectorCaps {
            incremental_fetch: true,
            fetch_by_id: true,
        }
    }

    async fn fetch(&self, cursor: Option<&str>) -> Result<FetchOutput, FetchError> {
        let start = window_start(cursor, self.lookback_days);
        let url = format!("{}?format=json&RecallDateStart={}", BASE_URL, start);

        let payload = self.http.get_json(&url).await?;
        let records = Self::parse_items(&payload)?;

        tracing::debug!(records = records.len(), since = %start, "CPSC fetch complete");

        Ok(FetchOutput {
            records,
            next_cursor: Utc::now().date_naive().format("%Y-%m-%d").to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_parses_into_raw_records() {
        let payload = serde_json::json!([
            {"RecallID": 24105, "Title": "Acme Recalls Strollers"},
            {"RecallID": 24106, "Title": "Acme Recalls Heaters"}
        ]);
        let records = CpscConnector::parse_items(&payload).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source_record_id, "24105");
        assert!(!records[0].content_hash.is_empty());
    }

    #[test]
    fn reshaped_listing_is_schema_drift() {
        let payload = serde_json::json!({"recalls": []});
        assert!(matches!(
            CpscConnector::parse_items(&payload),
            Err(FetchError::SchemaChanged(_))
        ));
    }

    #[test]
    fn declares_incremental_capability() {
        let connector = CpscConnector::new(90);
        assert!(connector.caps().incremental_fetch);
        assert_eq!(connector.source_code(), "cpsc");
    }
}
