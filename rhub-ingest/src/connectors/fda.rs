//! FDA Connector
//!
//! Pulls enforcement reports from the openFDA food/drug/device enforcement
//! endpoint. openFDA enforces 240 requests/minute per key; we stay well
//! under it and honor Retry-After on 429.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

use super::http::{expect_array, expect_id, SourceHttp};
use super::window_start;
use crate::types::{ConnectorCaps, FetchError, FetchOutput, RawRecord, SourceConnector};

const BASE_URL: &str = "https://api.fda.gov/food/enforcement.json";
const PAGE_SIZE: u32 = 100;

pub struct FdaConnector {
    http: SourceHttp,
    lookback_days: u32,
}

impl FdaConnector {
    pub fn new(lookback_days: u32) -> Self {
        Self {
            http: SourceHttp::new(120, Duration::from_secs(60)),
            lookback_days,
        }
    }

    fn parse_items(payload: &serde_json::Value) -> Result<Vec<RawRecord>, FetchError> {
        let items = expect_array(payload, "/results")?;
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let id = expect_id(item, "/recall_number")?;
            records.push(RawRecord::new(id, item.clone()));
        }
        Ok(records)
    }
}

#[async_trait]
impl SourceConnector for FdaConnector {
    fn source_code(&self) -> &'static str {
        "fda"
    }

    fn caps(&self) -> ConnectorCaps {
        ConnectorCaps {
            incremental_fetch: true,
            fetch_by_id: false,
        }
    }

    async fn fetch(&self, cursor: Option<&str>) -> Result<FetchOutput, FetchError> {
        let start = window_start(cursor, self.lookback_days);
        let end = Utc::now().date_naive();
        let url = format!(
            "{}?search=recall_initiation_date:[{}+TO+{}]&limit={}",
            BASE_URL,
            start.format("%Y%m%d"),
            end.format("%Y%m%d"),
            PAGE_SIZE,
        );

        let payload = self.http.get_json(&url).await?;
        let records = Self::parse_items(&payload)?;

        tracing::debug!(records = records.len(), since = %start, "FDA fetch complete");

        Ok(FetchOutput {
            records,
            next_cursor: end.format("%Y-%m-%d").to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforcement_listing_parses() {
        let payload = serde_json::json!({
            "meta": {"results": {"total": 1}},
            "results": [
                {"recall_number": "F-0042-2024", "product_description": "Spinach"}
            ]
        });
        let records = FdaConnector::parse_items(&payload).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_record_id, "F-0042-2024");
    }

    #[test]
    fn missing_results_array_is_schema_drift() {
        let payload = serde_json::json!({"error": {"code": "NOT_FOUND"}});
        assert!(matches!(
            FdaConnector::parse_items(&payload),
            Err(FetchError::SchemaChanged(_))
        ));
    }
}
