//! Risk Scorer
//!
//! `score(...)` is a pure function of the row's current fields, the source
//! authority weight, and the clock: hazard-type weight + category weight +
//! source-authority weight − recency decay, clamped to [0, 100]. It carries
//! no incremental state, so recomputation can run any number of times with
//! identical results for identical inputs and time.

use chrono::{DateTime, NaiveDate, Utc};

use crate::models::Recall;

/// Base severity weight per canonical hazard type
const HAZARD_WEIGHTS: &[(&str, u8)] = &[
    ("fire", 40),
    ("drowning", 40),
    ("electric_shock", 38),
    ("burn", 38),
    ("choking", 36),
    ("chemical", 34),
    ("microbiological", 32),
    ("entrapment", 30),
    ("fall", 28),
    ("laceration", 24),
    ("injury", 22),
    ("other", 18),
];

/// Weight per canonical product category
const CATEGORY_WEIGHTS: &[(&str, u8)] = &[
    ("nursery", 25),
    ("toys", 22),
    ("electronics", 18),
    ("appliances", 18),
    ("food_contact", 15),
    ("furniture", 15),
    ("sports", 12),
    ("clothing", 10),
    ("automotive", 14),
    ("other", 10),
];

/// Recency decay: one point per 30 days since the recall date, capped
const DECAY_DAYS_PER_POINT: i64 = 30;
const MAX_DECAY: i64 = 25;

/// Severity weight for a canonical hazard type (unknown types score as
/// "other")
pub fn hazard_weight(hazard_type: &str) -> u8 {
    lookup(HAZARD_WEIGHTS, hazard_type)
}

/// Weight for a canonical product category
pub fn category_weight(category: &str) -> u8 {
    lookup(CATEGORY_WEIGHTS, category)
}

fn lookup(table: &[(&str, u8)], key: &str) -> u8 {
    let key = key.trim().to_lowercase();
    table
        .iter()
        .find(|(k, _)| *k == key)
        .or_else(|| table.iter().find(|(k, _)| *k == "other"))
        .map(|(_, w)| *w)
        .unwrap_or(0)
}

/// Monotonically increasing decay for older recalls, floored at zero days
pub fn recency_decay(recall_date: NaiveDate, now: DateTime<Utc>) -> i64 {
    let days = (now.date_naive() - recall_date).num_days().max(0);
    (days / DECAY_DAYS_PER_POINT).min(MAX_DECAY)
}

/// Compute the risk score for a canonical row
pub fn score(recall: &Recall, authority_weight: u8, now: DateTime<Utc>) -> u8 {
    let base = hazard_weight(&recall.hazard_type) as i64
        + category_weight(&recall.category) as i64
        + authority_weight as i64;
    let decayed = base - recency_decay(recall.recall_date, now);
    decayed.clamp(0, 100) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn recall(hazard: &str, category: &str, date: NaiveDate) -> Recall {
        Recall {
            id: Uuid::new_v4(),
            source_agency: "CPSC".into(),
            source_record_id: "1".into(),
            product_name: "Widget".into(),
            brand: "Acme".into(),
            model_numbers: BTreeSet::new(),
            identifying_codes: BTreeSet::new(),
            category: category.into(),
            hazard_type: hazard.into(),
            hazard_description: String::new(),
            country: "US".into(),
            recall_date: date,
            risk_score: 0,
            match_confidence: 1.0,
            merged_from: BTreeSet::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn score_is_bounded_for_all_table_inputs() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        for (hazard, _) in HAZARD_WEIGHTS {
            for (category, _) in CATEGORY_WEIGHTS {
                for days_ago in [0i64, 1, 29, 30, 365, 3650] {
                    let date = now.date_naive() - chrono::Duration::days(days_ago);
                    let r = recall(hazard, category, date);
                    for authority in [0u8, 5, 10, 15] {
                        let s = score(&r, authority, now);
                        assert!(s <= 100, "{hazard}/{category} scored {s}");
                    }
                }
            }
        }
    }

    #[test]
    fn severe_hazard_outscores_mild_hazard() {
        let now = Utc::now();
        let date = now.date_naive();
        let fire = recall("fire", "nursery", date);
        let laceration = recall("laceration", "nursery", date);
        assert!(score(&fire, 10, now) > score(&laceration, 10, now));
    }

    #[test]
    fn older_recall_scores_lower() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let fresh = recall("fire", "toys", now.date_naive());
        let stale = recall(
            "fire",
            "toys",
            now.date_naive() - chrono::Duration::days(400),
        );
        assert!(score(&fresh, 10, now) > score(&stale, 10, now));
    }

    #[test]
    fn decay_is_capped() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let old = recall("fire", "toys", now.date_naive() - chrono::Duration::days(3650));
        let older = recall(
            "fire",
            "toys",
            now.date_naive() - chrono::Duration::days(7300),
        );
        assert_eq!(score(&old, 10, now), score(&older, 10, now));
    }

    #[test]
    fn future_dated_recall_does_not_underflow() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let future = recall("fire", "toys", now.date_naive() + chrono::Duration::days(10));
        assert_eq!(recency_decay(future.recall_date, now), 0);
    }

    #[test]
    fn unknown_hazard_falls_back_to_other() {
        assert_eq!(hazard_weight("mystery"), hazard_weight("other"));
        assert_eq!(category_weight("mystery"), category_weight("other"));
    }

    #[test]
    fn same_inputs_same_score() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let r = recall("choking", "toys", now.date_naive() - chrono::Duration::days(45));
        assert_eq!(score(&r, 12, now), score(&r, 12, now));
    }
}
