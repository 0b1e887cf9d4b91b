//! Normalizer
//!
//! Pure mapping from a source-native raw record onto the canonical draft
//! shape, driven by the per-source field tables in [`mapping`]. Unmappable
//! or ambiguous fields get best-effort values and lower the draft's
//! confidence instead of discarding the record; only a truly unparseable
//! payload is rejected, and the orchestrator counts those per source and
//! moves on.

pub mod mapping;

use chrono::{NaiveDate, Utc};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::models::RecallDraft;
use crate::types::RawRecord;
use mapping::{canonicalize, FieldMap, SourceSpec, CATEGORY_CANON, HAZARD_CANON};

/// Normalization failure: the payload carries nothing usable
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("unparseable payload: {0}")]
    Unparseable(String),
}

/// Confidence deductions for best-effort fields
const PENALTY_NO_BRAND: f64 = 0.10;
const PENALTY_NO_DATE: f64 = 0.15;
const PENALTY_HAZARD_UNMATCHED: f64 = 0.10;
const PENALTY_CATEGORY_UNMATCHED: f64 = 0.05;

/// Map one raw record onto a canonical draft
///
/// Returns the draft and a confidence in [0.0, 1.0] reflecting how much of
/// the mapping was best-effort.
pub fn normalize(
    raw: &RawRecord,
    spec: &SourceSpec,
) -> Result<(RecallDraft, f64), NormalizeError> {
    let map = &spec.field_map;
    let mut confidence = 1.0_f64;

    let product_name = first_string(&raw.payload, map.product_name);
    let hazard_text = first_string(&raw.payload, map.hazard_description);

    // A record with neither a product name nor hazard text cannot be
    // normalized into anything searchable.
    let product_name = match (product_name, &hazard_text) {
        (Some(name), _) => name,
        (None, Some(hazard)) => {
            confidence -= 0.2;
            truncate_words(hazard, 8)
        }
        (None, None) => {
            return Err(NormalizeError::Unparseable(format!(
                "record {} has no product name or hazard text",
                raw.source_record_id
            )))
        }
    };

    let brand = match first_string(&raw.payload, map.brand) {
        Some(brand) => brand,
        None => {
            confidence -= PENALTY_NO_BRAND;
            String::new()
        }
    };

    let (hazard_type, hazard_matched) = match first_string(&raw.payload, map.hazard_type) {
        Some(text) => canonicalize(HAZARD_CANON, &text),
        None => hazard_text
            .as_deref()
            .map(|t| canonicalize(HAZARD_CANON, t))
            .unwrap_or(("other".to_string(), false)),
    };
    if !hazard_matched {
        confidence -= PENALTY_HAZARD_UNMATCHED;
    }

    let (category, category_matched) = match first_string(&raw.payload, map.category) {
        Some(text) => canonicalize(CATEGORY_CANON, &text),
        None => canonicalize(CATEGORY_CANON, &product_name),
    };
    if !category_matched {
        confidence -= PENALTY_CATEGORY_UNMATCHED;
    }

    let recall_date = match first_string(&raw.payload, map.recall_date)
        .and_then(|text| parse_date(&text, map.date_formats))
    {
        Some(date) => date,
        None => {
            // Fall back to ingestion time so the row still sorts sanely.
            confidence -= PENALTY_NO_DATE;
            Utc::now().date_naive()
        }
    };

    let country = first_string(&raw.payload, map.country)
        .map(|c| c.trim().to_uppercase())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| spec.country.to_string());

    let draft = RecallDraft {
        source_agency: spec.agency.to_string(),
        source_record_id: raw.source_record_id.clone(),
        product_name,
        brand,
        model_numbers: string_set(&raw.payload, map.model_numbers),
        identifying_codes: string_set(&raw.payload, map.identifying_codes),
        category,
        hazard_type,
        hazard_description: hazard_text.unwrap_or_default(),
        country,
        recall_date,
    };

    Ok((draft, confidence.clamp(0.0, 1.0)))
}

/// First non-empty string value among the pointer candidates
fn first_string(payload: &serde_json::Value, pointers: &[&str]) -> Option<String> {
    for pointer in pointers {
        if let Some(value) = payload.pointer(pointer) {
            match value {
                serde_json::Value::String(s) if !s.trim().is_empty() => {
                    return Some(s.trim().to_string())
                }
                serde_json::Value::Number(n) => return Some(n.to_string()),
                _ => {}
            }
        }
    }
    None
}

/// Collect a string set from array-valued or comma-separated fields
fn string_set(payload: &serde_json::Value, pointers: &[&str]) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    for pointer in pointers {
        match payload.pointer(pointer) {
            Some(serde_json::Value::Array(items)) => {
                for item in items {
                    if let Some(s) = item.as_str() {
                        insert_split(&mut out, s);
                    }
                }
            }
            Some(serde_json::Value::String(s)) => insert_split(&mut out, s),
            _ => {}
        }
    }
    out
}

fn insert_split(out: &mut BTreeSet<String>, raw: &str) {
    for part in raw.split(',') {
        let part = part.trim();
        if !part.is_empty() {
            out.insert(part.to_string());
        }
    }
}

fn parse_date(text: &str, formats: &[&str]) -> Option<NaiveDate> {
    // RFC3339 timestamps first, then the source's declared formats
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    for format in formats {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(text, format) {
            return Some(dt.date());
        }
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date);
        }
    }
    None
}

fn truncate_words(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}
