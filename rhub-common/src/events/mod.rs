//! Event types for the RecallHub event system
//!
//! Events describe ingestion-run and corpus lifecycle milestones. They are
//! broadcast on the [`EventBus`] and consumed by the SSE endpoint and by ops
//! tooling. Broadcast is lossy by design: a slow subscriber misses events
//! rather than stalling the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// RecallHub event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RecallEvent {
    /// Ingestion run accepted and started
    RunStarted {
        run_id: Uuid,
        sources: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// One source's fetch+normalize+dedupe+commit unit started
    SourceStarted {
        run_id: Uuid,
        source_code: String,
        timestamp: DateTime<Utc>,
    },

    /// One source's unit committed successfully
    SourceCompleted {
        run_id: Uuid,
        source_code: String,
        records_fetched: usize,
        records_new: usize,
        records_merged: usize,
        timestamp: DateTime<Utc>,
    },

    /// One source's unit failed for this run (other sources continue)
    SourceFailed {
        run_id: Uuid,
        source_code: String,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// Ingestion run reached a terminal state
    RunFinished {
        run_id: Uuid,
        state: String,
        sources_succeeded: usize,
        sources_failed: usize,
        timestamp: DateTime<Utc>,
    },

    /// Risk recalculation cycle finished
    RiskRecalculated {
        scanned: usize,
        updated: usize,
        timestamp: DateTime<Utc>,
    },

    /// Search index snapshot refreshed
    IndexRefreshed {
        documents: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast event bus shared by pipeline components and SSE subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RecallEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<RecallEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns the subscriber count, or an error if nobody is listening.
    /// Emission failures are never fatal to the pipeline; callers ignore the
    /// result with `let _ =`.
    pub fn emit(&self, event: RecallEvent) -> Result<usize, broadcast::error::SendError<RecallEvent>> {
        self.tx.send(event)
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
