//! Health Canada Recalls and Safety Alerts Connector

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

use super::http::{expect_array, expect_id, SourceHttp};
use super::window_start;
use crate::types::{ConnectorCaps, FetchError, FetchOutput, RawRecord, SourceConnector};

const BASE_URL: &str = "https://healthycanadians.gc.ca/recall-alert-rappel-avis/api/search";

pub struct HealthCanadaConnector {
    http: SourceHttp,
    lookback_days: u32,
}

impl HealthCanadaConnector {
    pub fn new(lookback_days: u32) -> Self {
        Self {
            http: SourceHttp::new(60, Duration::from_secs(60)),
            lookback_days,
        }
    }

    fn parse_items(payload: &serde_json::Value) -> Result<Vec<RawRecord>, FetchError> {
        let items = expect_array(payload, "/results")?;
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let id = expect_id(item, "/recallId")?;
            records.push(RawRecord::new(id, item.clone()));
        }
        Ok(records)
    }
}

#[async_trait]
impl SourceConnector for HealthCanadaConnector {
    fn source_code(&self) -> &'static str {
        "health_canada"
    }

    fn caps(&self) -> ConnectorCaps {
        ConnectorCaps {
            incremental_fetch: true,
            fetch_by_id: true,
        }
    }

    async fn fetch(&self, cursor: Option<&str>) -> Result<FetchOutput, FetchError> {
        let start = window_start(cursor, self.lookback_days);
        let url = format!("{}?cat=1&lang=en&since={}", BASE_URL, start);

        let payload = self.http.get_json(&url).await?;
        let records = Self::parse_items(&payload)?;

        tracing::debug!(records = records.len(), since = %start, "Health Canada fetch complete");

        Ok(FetchOutput {
            records,
            next_cursor: Utc::now().date_naive().format("%Y-%m-%d").to_string(),
        })
    }
}
