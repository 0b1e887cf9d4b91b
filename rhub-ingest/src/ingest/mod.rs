//! Ingestion orchestration: retry policy and the run orchestrator

pub mod backoff;
pub mod orchestrator;

pub use backoff::{fetch_with_retry, BackoffPolicy, FetchStats};
pub use orchestrator::{IngestOrchestrator, RecalcScope, RiskRecalcSummary, SourceLocks};
