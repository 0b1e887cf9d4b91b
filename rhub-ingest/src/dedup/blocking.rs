//! Blocking keys for duplicate-candidate selection
//!
//! A coarse key (normalized brand + product-name token + country + date
//! bucket) limits pair comparison to plausible candidates instead of the
//! whole corpus. Date buckets are 14 days wide; candidate lookup also probes
//! the adjacent buckets so near-boundary dates still meet.

use chrono::{Datelike, NaiveDate};

const BUCKET_DAYS: i64 = 14;
const KEY_PREFIX_LEN: usize = 4;

/// Lowercase, keep alphanumerics, split on everything else
pub fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

/// Normalized form used by similarity scoring: tokens joined by one space
pub fn normalize_text(text: &str) -> String {
    tokens(text).join(" ")
}

/// Bucket index for a recall date
pub fn date_bucket(date: NaiveDate) -> i64 {
    i64::from(date.num_days_from_ce()) / BUCKET_DAYS
}

/// Blocking key for one record
pub fn blocking_key(brand: &str, product_name: &str, country: &str, date: NaiveDate) -> String {
    key_for_bucket(brand, product_name, country, date_bucket(date))
}

/// Candidate keys: the record's bucket plus both neighbors
pub fn candidate_keys(
    brand: &str,
    product_name: &str,
    country: &str,
    date: NaiveDate,
) -> Vec<String> {
    let bucket = date_bucket(date);
    [bucket - 1, bucket, bucket + 1]
        .iter()
        .map(|b| key_for_bucket(brand, product_name, country, *b))
        .collect()
}

fn key_for_bucket(brand: &str, product_name: &str, country: &str, bucket: i64) -> String {
    let brand_tokens = tokens(brand);
    let name_tokens = tokens(product_name);

    let brand_part = brand_tokens
        .first()
        .map(|t| prefix(t))
        .unwrap_or_else(|| name_tokens.first().map(|t| prefix(t)).unwrap_or_default());

    // Longest name token not belonging to the brand; brand-only names fall
    // back to the brand part so the key never degenerates to empty.
    let name_part = name_tokens
        .iter()
        .filter(|t| !brand_tokens.contains(t))
        .max_by_key(|t| t.len())
        .map(|t| prefix(t))
        .unwrap_or_else(|| brand_part.clone());

    format!(
        "{}|{}|{}|{}",
        brand_part,
        name_part,
        country.to_lowercase(),
        bucket
    )
}

fn prefix(token: &str) -> String {
    token.chars().take(KEY_PREFIX_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn singular_and_plural_product_names_share_a_key() {
        let a = blocking_key("Acme", "Acme Stroller", "US", date(2024, 1, 10));
        let b = blocking_key("ACME", "ACME Strollers Model 5", "US", date(2024, 1, 10));
        assert_eq!(a, b);
    }

    #[test]
    fn nearby_dates_meet_through_adjacent_buckets() {
        let a = blocking_key("Acme", "Acme Stroller", "US", date(2024, 1, 10));
        let keys = candidate_keys("ACME", "ACME Strollers Model 5", "US", date(2024, 1, 12));
        assert!(keys.contains(&a));
    }

    #[test]
    fn different_countries_block_apart() {
        let a = blocking_key("Acme", "Stroller", "US", date(2024, 1, 10));
        let b = blocking_key("Acme", "Stroller", "DE", date(2024, 1, 10));
        assert_ne!(a, b);
    }

    #[test]
    fn missing_brand_falls_back_to_name_token() {
        let key = blocking_key("", "Baby Rattle", "US", date(2024, 3, 1));
        assert!(key.starts_with("baby|"));
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize_text("ACME  Strollers, Model-5!"), "acme strollers model 5");
    }
}
