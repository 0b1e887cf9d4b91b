//! OECD GlobalRecalls Portal Connector
//!
//! Aggregates notices from jurisdictions we have no direct connector for;
//! lowest merge priority so direct-agency data wins on conflicts.

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

use super::http::{expect_array, expect_id, SourceHttp};
use crate::types::{ConnectorCaps, FetchError, FetchOutput, RawRecord, SourceConnector};

const BASE_URL: &str = "https://globalrecalls.oecd.org/ws/search.xqy";

pub struct OecdConnector {
    http: SourceHttp,
    lookback_days: u32,
}

impl OecdConnector {
    pub fn new(lookback_days: u32) -> Self {
        Self {
            http: SourceHttp::new(20, Duration::from_secs(120)),
            lookback_days,
        }
    }

    fn parse_items(payload: &serde_json::Value) -> Result<Vec<RawRecord>, FetchError> {
        let items = expect_array(payload, "/results")?;
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let id = expect_id(item, "/uid")?;
            records.push(RawRecord::new(id, item.clone()));
        }
        Ok(records)
    }
}

#[async_trait]
impl SourceConnector for OecdConnector {
    fn source_code(&self) -> &'static str {
        "oecd"
    }

    fn caps(&self) -> ConnectorCaps {
        ConnectorCaps {
            incremental_fetch: false,
            fetch_by_id: false,
        }
    }

    async fn fetch(&self, _cursor: Option<&str>) -> Result<FetchOutput, FetchError> {
        let url = format!("{}?q=&lang=en&days={}", BASE_URL, self.lookback_days);

        let payload = self.http.get_json(&url).await?;
        let records = Self::parse_items(&payload)?;

        tracing::debug!(records = records.len(), "OECD fetch complete");

        Ok(FetchOutput {
            records,
            next_cursor: Utc::now().date_naive().format("%Y-%m-%d").to_string(),
        })
    }
}
