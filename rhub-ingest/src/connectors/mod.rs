//! Source connectors
//!
//! One small, independently unit-testable implementation per regulatory
//! agency, all behind the `SourceConnector` trait from `types`, registered
//! in a [`ConnectorRegistry`] keyed by source code. The roster scales
//! linearly: a new agency is one connector module plus one `SourceSpec`
//! entry in the normalizer mapping tables.
//!
//! # Connectors
//! 1. **cpsc** - US Consumer Product Safety Commission (incremental)
//! 2. **fda** - US FDA enforcement reports (incremental)
//! 3. **eu_safety_gate** - EU Safety Gate / RAPEX (lookback window)
//! 4. **health_canada** - Health Canada recalls (incremental)
//! 5. **accc** - Product Safety Australia (lookback window)
//! 6. **oecd** - OECD GlobalRecalls portal (lookback window)

pub mod accc;
pub mod cpsc;
pub mod fda;
pub mod health_canada;
pub mod http;
pub mod oecd;
pub mod safety_gate;

use chrono::{NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use crate::normalizer::mapping::{source_spec, SourceSpec};
use crate::types::SourceConnector;

/// Default lookback for sources without a stored watermark
pub const DEFAULT_LOOKBACK_DAYS: u32 = 90;

/// Resolve the fetch window start from a cursor or the lookback
pub(crate) fn window_start(cursor: Option<&str>, lookback_days: u32) -> NaiveDate {
    cursor
        .and_then(|c| NaiveDate::parse_from_str(c, "%Y-%m-%d").ok())
        .unwrap_or_else(|| {
            Utc::now().date_naive() - chrono::Duration::days(i64::from(lookback_days))
        })
}

/// One registered source: its declarative spec plus the live connector
#[derive(Clone)]
pub struct RegisteredSource {
    pub spec: &'static SourceSpec,
    pub connector: Arc<dyn SourceConnector>,
}

/// Registry of sources keyed by source code
#[derive(Default)]
pub struct ConnectorRegistry {
    sources: HashMap<&'static str, RegisteredSource>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in connector
    pub fn builtin(lookback_days: u32) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(cpsc::CpscConnector::new(lookback_days)));
        registry.register(Arc::new(fda::FdaConnector::new(lookback_days)));
        registry.register(Arc::new(safety_gate::SafetyGateConnector::new(lookback_days)));
        registry.register(Arc::new(health_canada::HealthCanadaConnector::new(
            lookback_days,
        )));
        registry.register(Arc::new(accc::AcccConnector::new(lookback_days)));
        registry.register(Arc::new(oecd::OecdConnector::new(lookback_days)));
        registry
    }

    /// Register a connector under its declared source code
    ///
    /// The source must have a spec in the mapping tables; a connector
    /// without one is a programming error caught at startup.
    pub fn register(&mut self, connector: Arc<dyn SourceConnector>) {
        let code = connector.source_code();
        let spec = source_spec(code)
            .unwrap_or_else(|| panic!("connector {:?} has no SourceSpec mapping entry", code));
        self.sources.insert(code, RegisteredSource { spec, connector });
    }

    pub fn get(&self, code: &str) -> Option<&RegisteredSource> {
        self.sources.get(code)
    }

    /// All registered source codes, sorted for stable run ordering
    pub fn codes(&self) -> Vec<String> {
        let mut codes: Vec<String> = self.sources.keys().map(|c| c.to_string()).collect();
        codes.sort();
        codes
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Merge tie-break priorities keyed by canonical agency name
    pub fn source_priorities(&self) -> HashMap<String, u8> {
        self.sources
            .values()
            .map(|s| (s.spec.agency.to_string(), s.spec.priority))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_registers_all_sources() {
        let registry = ConnectorRegistry::builtin(DEFAULT_LOOKBACK_DAYS);
        assert_eq!(registry.len(), 6);
        for code in ["cpsc", "fda", "eu_safety_gate", "health_canada", "accc", "oecd"] {
            let source = registry.get(code).unwrap_or_else(|| panic!("missing {code}"));
            assert_eq!(source.connector.source_code(), code);
            assert_eq!(source.spec.code, code);
        }
    }

    #[test]
    fn window_start_prefers_cursor() {
        let start = window_start(Some("2024-01-10"), 90);
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 1, 10).unwrap());
    }

    #[test]
    fn window_start_falls_back_to_lookback() {
        let start = window_start(None, 30);
        let expected = Utc::now().date_naive() - chrono::Duration::days(30);
        assert_eq!(start, expected);
    }

    #[test]
    fn malformed_cursor_falls_back_to_lookback() {
        let start = window_start(Some("not-a-date"), 7);
        let expected = Utc::now().date_naive() - chrono::Duration::days(7);
        assert_eq!(start, expected);
    }

    #[test]
    fn priorities_prefer_direct_agencies_over_aggregator() {
        let registry = ConnectorRegistry::builtin(DEFAULT_LOOKBACK_DAYS);
        let priorities = registry.source_priorities();
        assert!(priorities["CPSC"] < priorities["OECD-GLOBALRECALLS"]);
    }
}
