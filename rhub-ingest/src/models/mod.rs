//! Data models for the ingestion core

pub mod recall;
pub mod run;

pub use recall::{RawRef, Recall, RecallDraft};
pub use run::{IngestionRun, RunState, SourceOutcome};
