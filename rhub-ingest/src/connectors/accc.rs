//! ACCC Product Safety Australia Connector
//!
//! The listing endpoint is page-oriented with no date filter; fetches are
//! always the fixed lookback window.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

use super::http::{expect_array, expect_id, SourceHttp};
use crate::types::{ConnectorCaps, FetchError, FetchOutput, RawRecord, SourceConnector};

const BASE_URL: &str = "https://www.productsafety.gov.au/api/recalls";

pub struct AcccConnector {
    http: SourceHttp,
    lookback_days: u32,
}

impl AcccConnector {
    pub fn new(lookback_days: u32) -> Self {
        Self {
            http: SourceHttp::new(30, Duration::from_secs(90)),
            lookback_days,
        }
    }

    fn parse_items(payload: &serde_json::Value) -> Result<Vec<RawRecord>, FetchError> {
        let items = expect_array(payload, "/items")?;
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let id = expect_id(item, "/praNumber")?;
            records.push(RawRecord::new(id, item.clone()));
        }
        Ok(records)
    }
}

#[async_trait]
impl SourceConnector for AcccConnector {
    fn source_code(&self) -> &'static str {
        "accc"
    }

    fn caps(&self) -> ConnectorCaps {
        ConnectorCaps {
            incremental_fetch: false,
            fetch_by_id: false,
        }
    }

    async fn fetch(&self, _cursor: Option<&str>) -> Result<FetchOutput, FetchError> {
        let url = format!("{}?days={}", BASE_URL, self.lookback_days);

        let payload = self.http.get_json(&url).await?;
        let records = Self::parse_items(&payload)?;

        tracing::debug!(records = records.len(), "ACCC fetch complete");

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
    fn recall_listing_parses() {
        let payload = serde_json::json!({
            "items": [{"praNumber": "PRA2024-19876", "title": "Scooter recall"}]
        });
        let records = AcccConnector::parse_items(&payload).unwrap();
        assert_eq!(records[0].source_record_id, "PRA2024-19876");
    }
}
