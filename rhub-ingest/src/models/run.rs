//! Ingestion run state machine
//!
//! A run progresses PENDING → RUNNING → terminal. Partial success is the
//! normal case: the run only finishes FAILED when every attempted source
//! failed. CANCELLED records an operator abort; batches committed before
//! the abort stay committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ingestion run state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// Accepted, not yet started
    Pending,
    /// Per-source units in flight
    Running,
    /// Every attempted source succeeded
    Completed,
    /// Some sources succeeded, some failed
    CompletedWithErrors,
    /// Every attempted source failed
    Failed,
    /// Operator aborted; in-flight units were allowed to finish
    Cancelled,
}

/// Outcome of one source's fetch+normalize+dedupe+commit unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source_code: String,
    pub attempted: bool,
    pub succeeded: bool,
    pub records_fetched: usize,
    /// New canonical rows created
    pub records_new: usize,
    /// Drafts folded into an existing canonical row
    pub records_merged: usize,
    /// Raw records skipped because their content hash was unchanged
    pub records_unchanged: usize,
    /// Unparseable payloads skipped during normalization
    pub records_skipped: usize,
    /// Rate-limit waits honored during fetch (tallied separately from the
    /// transient retry budget so operators can tell "slow" from "broken")
    pub rate_limited_waits: u32,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl SourceOutcome {
    pub fn not_attempted(source_code: impl Into<String>) -> Self {
        Self {
            source_code: source_code.into(),
            attempted: false,
            succeeded: false,
            records_fetched: 0,
            records_new: 0,
            records_merged: 0,
            records_unchanged: 0,
            records_skipped: 0,
            rate_limited_waits: 0,
            error: None,
            duration_ms: 0,
        }
    }

    pub fn failed(source_code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            attempted: true,
            ..Self::not_attempted(source_code)
        }
    }
}

/// One ingestion run: requested scope, per-source outcomes, overall state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionRun {
    pub run_id: Uuid,
    pub state: RunState,
    /// Source codes this run targets
    pub sources: Vec<String>,
    /// Lookback window for sources without a stored watermark
    pub lookback_days: u32,
    pub outcomes: Vec<SourceOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl IngestionRun {
    pub fn new(sources: Vec<String>, lookback_days: u32) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            state: RunState::Pending,
            sources,
            lookback_days,
            outcomes: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Transition to a new state, stamping `finished_at` on terminal states
    pub fn transition_to(&mut self, new_state: RunState) {
        self.state = new_state;
        if self.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            RunState::Completed
                | RunState::CompletedWithErrors
                | RunState::Failed
                | RunState::Cancelled
        )
    }

    /// Derive the terminal state from accumulated outcomes
    ///
    /// `cancelled` wins over outcome arithmetic; otherwise FAILED only when
    /// every attempted source failed.
    pub fn finalize(&mut self, cancelled: bool) {
        let attempted = self.outcomes.iter().filter(|o| o.attempted).count();
        let succeeded = self.outcomes.iter().filter(|o| o.succeeded).count();

        let state = if cancelled {
            RunState::Cancelled
        } else if attempted == 0 {
            RunState::CompletedWithErrors
        } else if succeeded == attempted {
            RunState::Completed
        } else if succeeded == 0 {
            RunState::Failed
        } else {
            RunState::CompletedWithErrors
        };
        self.transition_to(state);
    }

    pub fn sources_succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded).count()
    }

    pub fn sources_failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.attempted && !o.succeeded)
            .count()
    }
}
