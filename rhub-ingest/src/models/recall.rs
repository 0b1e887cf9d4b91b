//! Canonical recall record and the normalizer's draft shape

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Reference to one raw record: `(source_agency, source_record_id)`
///
/// Serialized as `"AGENCY:record_id"` inside `merged_from` so provenance
/// survives round-trips through the JSON columns.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RawRef {
    pub agency: String,
    pub record_id: String,
}

impl RawRef {
    pub fn new(agency: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            agency: agency.into(),
            record_id: record_id.into(),
        }
    }

    /// Compact `"AGENCY:record_id"` form used in JSON columns
    pub fn compact(&self) -> String {
        format!("{}:{}", self.agency, self.record_id)
    }

    /// Parse the compact form; record ids may themselves contain colons
    pub fn parse(s: &str) -> Option<Self> {
        let (agency, record_id) = s.split_once(':')?;
        if agency.is_empty() || record_id.is_empty() {
            return None;
        }
        Some(Self::new(agency, record_id))
    }
}

/// Canonical recall record (the system's source of truth)
///
/// Created by the normalizer+deduplicator during an ingestion run, updated
/// in place by later merges and risk recomputation, never hard-deleted by
/// the core. A merge replaces the absorbed row: its raw references repoint
/// to the surviving row's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recall {
    /// Stable system-generated identifier
    pub id: Uuid,
    /// Agency of the first raw record that produced this row
    pub source_agency: String,
    /// Record id of that first raw record
    pub source_record_id: String,
    pub product_name: String,
    pub brand: String,
    pub model_numbers: BTreeSet<String>,
    /// Barcodes, batch/lot numbers, serial ranges
    pub identifying_codes: BTreeSet<String>,
    pub category: String,
    pub hazard_type: String,
    pub hazard_description: String,
    pub country: String,
    pub recall_date: NaiveDate,
    /// Severity score, always within [0, 100]
    pub risk_score: u8,
    /// Confidence that this row describes one real-world recall (0.0–1.0);
    /// lowered by ambiguous merges, never silently full
    pub match_confidence: f64,
    /// Raw references folded into this row beyond the originating one
    pub merged_from: BTreeSet<RawRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Recall {
    /// Create a canonical row from a normalized draft
    pub fn from_draft(draft: RecallDraft, confidence: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_agency: draft.source_agency,
            source_record_id: draft.source_record_id,
            product_name: draft.product_name,
            brand: draft.brand,
            model_numbers: draft.model_numbers,
            identifying_codes: draft.identifying_codes,
            category: draft.category,
            hazard_type: draft.hazard_type,
            hazard_description: draft.hazard_description,
            country: draft.country,
            recall_date: draft.recall_date,
            risk_score: 0,
            match_confidence: confidence.clamp(0.0, 1.0),
            merged_from: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The raw reference that originated this row
    pub fn origin_ref(&self) -> RawRef {
        RawRef::new(self.source_agency.clone(), self.source_record_id.clone())
    }

    /// All raw references this row answers for (origin + merged)
    pub fn all_refs(&self) -> BTreeSet<RawRef> {
        let mut refs = self.merged_from.clone();
        refs.insert(self.origin_ref());
        refs
    }
}

/// Normalizer output: a canonical-shaped draft plus the mapping confidence
///
/// Drafts are not yet deduplicated; they carry no id, score, or merge
/// provenance.
#[derive(Debug, Clone)]
pub struct RecallDraft {
    pub source_agency: String,
    pub source_record_id: String,
    pub product_name: String,
    pub brand: String,
    pub model_numbers: BTreeSet<String>,
    pub identifying_codes: BTreeSet<String>,
    pub category: String,
    pub hazard_type: String,
    pub hazard_description: String,
    pub country: String,
    pub recall_date: NaiveDate,
}
