//! Pair scoring for duplicate candidates
//!
//! Weighted blend of product-name similarity, brand similarity, and recall
//! date proximity. The weights are fixed; the merge threshold they feed is
//! configuration (settings table) so operators can tune against labeled
//! duplicate/non-duplicate samples.

use chrono::NaiveDate;
use strsim::jaro_winkler;

use super::blocking::normalize_text;

const NAME_WEIGHT: f64 = 0.60;
const BRAND_WEIGHT: f64 = 0.25;
const DATE_WEIGHT: f64 = 0.15;

/// Dates further apart than this contribute zero proximity
const DATE_WINDOW_DAYS: i64 = 30;

/// Fields compared between two duplicate candidates
#[derive(Debug, Clone)]
pub struct MatchFields<'a> {
    pub product_name: &'a str,
    pub brand: &'a str,
    pub recall_date: NaiveDate,
}

/// Score a candidate pair into [0.0, 1.0]
pub fn pair_score(a: &MatchFields<'_>, b: &MatchFields<'_>) -> f64 {
    let name_sim = jaro_winkler(
        &normalize_text(a.product_name),
        &normalize_text(b.product_name),
    );

    let brand_a = normalize_text(a.brand);
    let brand_b = normalize_text(b.brand);
    let brand_sim = if brand_a.is_empty() || brand_b.is_empty() {
        // Missing brand neither confirms nor denies a match
        0.5
    } else {
        jaro_winkler(&brand_a, &brand_b)
    };

    let days_apart = (a.recall_date - b.recall_date).num_days().abs();
    let date_prox = 1.0 - (days_apart.min(DATE_WINDOW_DAYS) as f64 / DATE_WINDOW_DAYS as f64);

    NAME_WEIGHT * name_sim + BRAND_WEIGHT * brand_sim + DATE_WEIGHT * date_prox
}
