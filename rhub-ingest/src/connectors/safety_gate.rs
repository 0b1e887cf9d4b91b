//! EU Safety Gate (ex-RAPEX) Connector
//!
//! The weekly-report endpoint has no since-parameter, so this connector has
//! no incremental fetch: it always pulls the fixed lookback window and
//! returns the window end as the cursor.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

use super::http::{expect_array, expect_id, SourceHttp};
use crate::types::{ConnectorCaps, FetchError, FetchOutput, RawRecord, SourceConnector};

const BASE_URL: &str = "https://ec.europa.eu/safety-gate-alerts/public/api/notification";

pub struct SafetyGateConnector {
    http: SourceHttp,
    lookback_days: u32,
}

impl SafetyGateConnector {
    pub fn new(lookback_days: u32) -> Self {
        Self {
            http: SourceHttp::new(60, Duration::from_secs(120)),
            lookback_days,
        }
    }

    fn parse_items(payload: &serde_json::Value) -> Result<Vec<RawRecord>, FetchError> {
        let items = expect_array(payload, "/content")?;
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let id = expect_id(item, "/reference")?;
            records.push(RawRecord::new(id, item.clone()));
        }
        Ok(records)
    }
}

#[async_trait]
impl SourceConnector for SafetyGateConnector {
    fn source_code(&self) -> &'static str {
        "eu_safety_gate"
    }

    fn caps(&self) -> ConnectorCaps {
        ConnectorCaps {
            incremental_fetch: false,
            fetch_by_id: true,
        }
    }

    async fn fetch(&self, _cursor: Option<&str>) -> Result<FetchOutput, FetchError> {
        // Fixed lookback window regardless of cursor
        let url = format!("{}?language=en&days={}", BASE_URL, self.lookback_days);

        let payload = self.http.get_json(&url).await?;
        let records = Self::parse_items(&payload)?;

        tracing::debug!(records = records.len(), "Safety Gate fetch complete");

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
    fn notification_listing_parses() {
        let payload = serde_json::json!({
            "content": [
                {"reference": "A12/01234/24", "product": {"name": "Night Light"}}
            ]
        });
        let records = SafetyGateConnector::parse_items(&payload).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_record_id, "A12/01234/24");
    }

    #[test]
    fn never_claims_incremental_fetch() {
        let connector = SafetyGateConnector::new(30);
        assert!(!connector.caps().incremental_fetch);
    }
}
