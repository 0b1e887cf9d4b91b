//! Search-Index Maintainer
//!
//! Keeps an in-memory trigram index over the searchable canonical fields
//! (product name, brand, hazard description, hazard type) consistent with
//! the latest committed data. The index is rebuilt from the store on
//! startup and updated incrementally after each committed batch, merge, or
//! rescore.
//!
//! Reads never block on maintenance: lookups take a read lock on the
//! snapshot, and writers prepare documents outside the lock, so the write
//! section is map insertion only. Staleness is bounded by "the refresh that
//! follows a commit"; queries between commit and refresh see the previous
//! snapshot.
//!
//! Query scoring blends trigram containment (query trigrams present in the
//! document) with the best per-token Jaro-Winkler similarity, so partial
//! and misspelled input still ranks: `"baby"` matches `"BABY"`, `"Baby"`,
//! and `"babys"` above the default threshold.

use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::dedup::blocking::{normalize_text, tokens};
use crate::models::Recall;

/// Weight of the per-token similarity component
const TOKEN_WEIGHT: f64 = 0.75;
/// Weight of the trigram containment component
const TRIGRAM_WEIGHT: f64 = 0.25;

/// One search query against the index
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub text: String,
    pub country: Option<String>,
    pub category: Option<String>,
    pub hazard_type: Option<String>,
    /// Minimum blended similarity; caller-adjustable, defaults tuned for
    /// recall-over-precision
    pub min_similarity: f64,
    pub limit: usize,
    pub offset: usize,
}

/// One ranked hit
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub recall_id: Uuid,
    pub similarity: f64,
}

struct Doc {
    recall_id: Uuid,
    country: String,
    category: String,
    hazard_type: String,
    /// Tokens from all searchable fields
    tokens: Vec<String>,
    trigrams: HashSet<[u8; 3]>,
}

#[derive(Default)]
struct Snapshot {
    docs: HashMap<Uuid, Doc>,
}

/// Trigram/similarity index over canonical rows
#[derive(Default)]
pub struct SearchIndex {
    snapshot: RwLock<Snapshot>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole snapshot from the canonical store (startup)
    pub async fn rebuild(&self, rows: &[Recall]) {
        let docs: HashMap<Uuid, Doc> = rows.iter().map(|r| (r.id, build_doc(r))).collect();
        let count = docs.len();
        *self.snapshot.write().await = Snapshot { docs };
        tracing::info!(documents = count, "Search index rebuilt");
    }

    /// Fold one committed batch into the snapshot
    ///
    /// Documents are prepared before the write lock is taken; the locked
    /// section is pure map mutation.
    pub async fn apply(&self, upserts: &[Recall], removed: &[Uuid]) {
        let prepared: Vec<(Uuid, Doc)> = upserts.iter().map(|r| (r.id, build_doc(r))).collect();
        let mut snapshot = self.snapshot.write().await;
        for id in removed {
            snapshot.docs.remove(id);
        }
        for (id, doc) in prepared {
            snapshot.docs.insert(id, doc);
        }
    }

    /// Number of indexed documents
    pub async fn len(&self) -> usize {
        self.snapshot.read().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Ranked fuzzy lookup
    pub async fn search(&self, query: &SearchQuery) -> Vec<SearchHit> {
        let query_tokens = tokens(&query.text);
        if query_tokens.is_empty() {
            return Vec::new();
        }
        let query_trigrams = trigram_set(&normalize_text(&query.text));

        let snapshot = self.snapshot.read().await;
        let mut hits: Vec<SearchHit> = snapshot
            .docs
            .values()
            .filter(|doc| filter_matches(doc, query))
            .filter_map(|doc| {
                let similarity = score_doc(doc, &query_tokens, &query_trigrams);
                (similarity >= query.min_similarity).then_some(SearchHit {
                    recall_id: doc.recall_id,
                    similarity,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.recall_id.cmp(&b.recall_id))
        });

        hits.into_iter()
            .skip(query.offset)
            .take(if query.limit == 0 { usize::MAX } else { query.limit })
            .collect()
    }
}

fn filter_matches(doc: &Doc, query: &SearchQuery) -> bool {
    if let Some(country) = &query.country {
        if !doc.country.eq_ignore_ascii_case(country) {
            return false;
        }
    }
    if let Some(category) = &query.category {
        if !doc.category.eq_ignore_ascii_case(category) {
            return false;
        }
    }
    if let Some(hazard) = &query.hazard_type {
        if !doc.hazard_type.eq_ignore_ascii_case(hazard) {
            return false;
        }
    }
    true
}

fn build_doc(recall: &Recall) -> Doc {
    let searchable = format!(
        "{} {} {} {}",
        recall.product_name, recall.brand, recall.hazard_description, recall.hazard_type
    );
    let normalized = normalize_text(&searchable);
    Doc {
        recall_id: recall.id,
        country: recall.country.clone(),
        category: recall.category.clone(),
        hazard_type: recall.hazard_type.clone(),
        tokens: tokens(&searchable),
        trigrams: trigram_set(&normalized),
    }
}

/// Trigrams over the normalized text (ASCII-folded bytes; multibyte
/// characters participate positionally)
fn trigram_set(normalized: &str) -> HashSet<[u8; 3]> {
    let bytes = normalized.as_bytes();
    if bytes.len() < 3 {
        // Short strings index their padded form so two-letter brands match
        let mut padded = [b' '; 3];
        for (i, b) in bytes.iter().enumerate() {
            padded[i] = *b;
        }
        return if bytes.is_empty() {
            HashSet::new()
        } else {
            [padded].into_iter().collect()
        };
    }
    bytes
        .windows(3)
        .map(|w| [w[0], w[1], w[2]])
        .collect()
}

/// Blend of best-token similarity and trigram containment, averaged over
/// query tokens
fn score_doc(doc: &Doc, query_tokens: &[String], query_trigrams: &HashSet<[u8; 3]>) -> f64 {
    let token_score: f64 = query_tokens
        .iter()
        .map(|qt| {
            doc.tokens
                .iter()
                .map(|dt| strsim::jaro_winkler(qt, dt))
                .fold(0.0, f64::max)
        })
        .sum::<f64>()
        / query_tokens.len() as f64;

    let containment = if query_trigrams.is_empty() {
        0.0
    } else {
        let present = query_trigrams
            .iter()
            .filter(|t| doc.trigrams.contains(*t))
            .count();
        present as f64 / query_trigrams.len() as f64
    };

    TOKEN_WEIGHT * token_score + TRIGRAM_WEIGHT * containment
}
