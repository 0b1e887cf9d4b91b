//! Deduplicator/Merger
//!
//! Groups normalized drafts that describe the same real-world recall across
//! sources and re-fetches, and folds them into canonical rows with merge
//! provenance.
//!
//! Pipeline per draft:
//! 1. `(source_agency, source_record_id)` short-circuit through the durable
//!    raw-record index; an unchanged content hash skips all further work.
//! 2. Blocking-key candidate lookup (in-batch arena + canonical store).
//! 3. Pair scoring within the block; at or above the merge threshold the
//!    draft folds into the best candidate via union-find, so transitive
//!    chains collapse to one row regardless of arrival order.
//!
//! Near-threshold merges are performed with lowered `match_confidence`
//! rather than silently at full confidence; the review workflow downstream
//! picks those up.

pub mod blocking;
pub mod similarity;
pub mod union_find;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::db;
use crate::models::{RawRef, Recall, RecallDraft};
use crate::scoring::hazard_weight;
use blocking::{blocking_key, candidate_keys};
use rhub_common::Result;
use similarity::{pair_score, MatchFields};
use union_find::UnionFind;

/// Dedup tuning, resolved from the settings table at run start
#[derive(Debug, Clone)]
pub struct DedupConfig {
    /// Pair score at or above which two records merge
    pub merge_threshold: f64,
    /// Pair score below which a merge is flagged ambiguous
    /// (merge_threshold <= score < flag_threshold lowers match_confidence)
    pub flag_threshold: f64,
    /// Source priority order for merge tie-breaks (lower = preferred)
    pub source_priorities: HashMap<String, u8>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            merge_threshold: 0.82,
            flag_threshold: 0.90,
            source_priorities: HashMap::new(),
        }
    }
}

/// One normalized draft entering dedup
#[derive(Debug, Clone)]
pub struct DraftEntry {
    pub draft: RecallDraft,
    /// Normalizer mapping confidence
    pub confidence: f64,
    /// Raw payload hash for change detection
    pub content_hash: String,
}

/// Result of deduplicating one batch; committed transactionally by the
/// orchestrator
#[derive(Debug, Default)]
pub struct DedupOutcome {
    /// Canonical rows to insert or update
    pub upserts: Vec<Recall>,
    /// Rows absorbed by a merge: (absorbed_id, survivor_id); the absorbed
    /// row is removed and its raw references repointed
    pub folds: Vec<(Uuid, Uuid)>,
    /// Raw index entries to upsert: (raw ref, canonical id, content hash)
    pub raw_index: Vec<(RawRef, Uuid, String)>,
    pub records_new: usize,
    pub records_merged: usize,
    pub records_unchanged: usize,
}

struct Entry {
    recall: Recall,
    /// Loaded from the canonical store (id must survive or be folded)
    existing: bool,
    /// Needs writing back
    touched: bool,
}

/// Batch deduplicator
///
/// The union-find arena is scoped to one batch; cross-run and cross-batch
/// merges resolve through the raw-record index and the store-backed
/// candidate lookup, so no shared in-memory state exists between
/// concurrently running sources.
pub struct Deduplicator<'a> {
    pool: &'a SqlitePool,
    config: DedupConfig,
}

impl<'a> Deduplicator<'a> {
    pub fn new(pool: &'a SqlitePool, config: DedupConfig) -> Self {
        Self { pool, config }
    }

    /// Deduplicate one source batch against itself and the canonical store
    pub async fn dedupe_batch(&self, batch: Vec<DraftEntry>) -> Result<DedupOutcome> {
        let now = Utc::now();
        let mut arena: Vec<Entry> = Vec::new();
        let mut uf = UnionFind::new();
        // arena indices registered under their own (primary) blocking key
        let mut by_key: HashMap<String, Vec<usize>> = HashMap::new();
        let mut loaded_ids: HashMap<Uuid, usize> = HashMap::new();
        // (raw ref, arena index, hash); resolved to canonical ids at the end
        let mut raw_assign: Vec<(RawRef, usize, String)> = Vec::new();
        let mut outcome = DedupOutcome::default();

        for item in batch {
            let raw_ref = RawRef::new(
                item.draft.source_agency.clone(),
                item.draft.source_record_id.clone(),
            );

            let seen = db::recalls::find_canonical_for_raw(
                self.pool,
                &raw_ref.agency,
                &raw_ref.record_id,
            )
            .await?;

            if let Some((canon_id, stored_hash)) = seen {
                if stored_hash == item.content_hash {
                    outcome.records_unchanged += 1;
                    continue;
                }
                // Source re-published this record with new content: refresh
                // the canonical row in place.
                if let Some(idx) = ensure_loaded(
                    self.pool,
                    canon_id,
                    &mut arena,
                    &mut uf,
                    &mut by_key,
                    &mut loaded_ids,
                )
                .await?
                {
                    let root = uf.find(idx);
                    refresh_from_draft(
                        &mut arena[root].recall,
                        &item.draft,
                        item.confidence,
                        now,
                    );
                    arena[root].touched = true;
                    raw_assign.push((raw_ref, root, item.content_hash));
                    outcome.records_merged += 1;
                    continue;
                }
                // Index pointed at a missing row; fall through and rebuild.
                tracing::warn!(
                    agency = %raw_ref.agency,
                    record_id = %raw_ref.record_id,
                    "Raw index entry without canonical row, re-creating"
                );
            }

            // Unseen (or orphaned) raw record: block, score, merge-or-create.
            let keys = candidate_keys(
                &item.draft.brand,
                &item.draft.product_name,
                &item.draft.country,
                item.draft.recall_date,
            );

            let stored = db::recalls::find_by_block_keys(self.pool, &keys).await?;
            for rec in stored {
                if !loaded_ids.contains_key(&rec.id) {
                    let idx = push_entry(rec, true, false, &mut arena, &mut uf, &mut by_key);
                    let id = arena[idx].recall.id;
                    loaded_ids.insert(id, idx);
                }
            }

            let mut cand_roots: BTreeSet<usize> = BTreeSet::new();
            for key in &keys {
                if let Some(indices) = by_key.get(key) {
                    for &i in indices {
                        cand_roots.insert(uf.find(i));
                    }
                }
            }

            let recall = Recall::from_draft(item.draft, item.confidence, now);
            let idx = push_entry(recall, false, true, &mut arena, &mut uf, &mut by_key);

            let mut best: Option<(usize, f64)> = None;
            for root in cand_roots {
                if root == idx {
                    continue;
                }
                let score = pair_score(
                    &match_fields(&arena[root].recall),
                    &match_fields(&arena[idx].recall),
                );
                if score >= self.config.merge_threshold
                    && best.map(|(_, b)| score > b).unwrap_or(true)
                {
                    best = Some((root, score));
                }
            }

            match best {
                Some((root, score)) => {
                    merge_roots(
                        &mut arena,
                        &mut uf,
                        &mut outcome.folds,
                        root,
                        idx,
                        score,
                        &self.config,
                        now,
                    );
                    outcome.records_merged += 1;
                }
                None => {
                    outcome.records_new += 1;
                }
            }
            raw_assign.push((raw_ref, idx, item.content_hash));
        }

        // Collect surviving roots and resolve raw assignments through them.
        for idx in 0..arena.len() {
            if uf.find(idx) == idx && arena[idx].touched {
                outcome.upserts.push(arena[idx].recall.clone());
            }
        }
        for (raw_ref, idx, hash) in raw_assign {
            let root = uf.find(idx);
            outcome.raw_index.push((raw_ref, arena[root].recall.id, hash));
        }

        Ok(outcome)
    }
}

fn match_fields(recall: &Recall) -> MatchFields<'_> {
    MatchFields {
        product_name: &recall.product_name,
        brand: &recall.brand,
        recall_date: recall.recall_date,
    }
}

fn push_entry(
    recall: Recall,
    existing: bool,
    touched: bool,
    arena: &mut Vec<Entry>,
    uf: &mut UnionFind,
    by_key: &mut HashMap<String, Vec<usize>>,
) -> usize {
    let key = blocking_key(
        &recall.brand,
        &recall.product_name,
        &recall.country,
        recall.recall_date,
    );
    let idx = uf.make_set();
    arena.push(Entry {
        recall,
        existing,
        touched,
    });
    by_key.entry(key).or_default().push(idx);
    idx
}

async fn ensure_loaded(
    pool: &SqlitePool,
    id: Uuid,
    arena: &mut Vec<Entry>,
    uf: &mut UnionFind,
    by_key: &mut HashMap<String, Vec<usize>>,
    loaded_ids: &mut HashMap<Uuid, usize>,
) -> Result<Option<usize>> {
    if let Some(&idx) = loaded_ids.get(&id) {
        return Ok(Some(idx));
    }
    match db::recalls::load_recall(pool, id).await? {
        Some(recall) => {
            let idx = push_entry(recall, true, false, arena, uf, by_key);
            loaded_ids.insert(id, idx);
            Ok(Some(idx))
        }
        None => Ok(None),
    }
}

/// Union two roots and fold the absorbed row's data into the survivor
#[allow(clippy::too_many_arguments)]
fn merge_roots(
    arena: &mut [Entry],
    uf: &mut UnionFind,
    folds: &mut Vec<(Uuid, Uuid)>,
    a: usize,
    b: usize,
    score: f64,
    config: &DedupConfig,
    now: DateTime<Utc>,
) {
    let ra = uf.find(a);
    let rb = uf.find(b);
    if ra == rb {
        return;
    }

    let survivor_is_a = prefer_first(&arena[ra], &arena[rb], &config.source_priorities);
    let (sv, ab) = if survivor_is_a { (ra, rb) } else { (rb, ra) };

    let absorbed = arena[ab].recall.clone();
    let absorbed_existing = arena[ab].existing;
    let ambiguous = score < config.flag_threshold;

    merge_recall(
        &mut arena[sv].recall,
        &absorbed,
        score,
        ambiguous,
        &config.source_priorities,
        now,
    );
    if absorbed_existing {
        folds.push((absorbed.id, arena[sv].recall.id));
    }
    arena[sv].existing = arena[sv].existing || absorbed_existing;
    arena[sv].touched = true;

    let new_root = uf.union(sv, ab);
    if new_root != sv {
        // Union-by-rank picked the other index; keep survivor data at root.
        arena.swap(sv, new_root);
    }
}

/// Survivor preference: existing rows keep their ids, then higher merge
/// confidence, then most recent update, then source priority order
fn prefer_first(a: &Entry, b: &Entry, priorities: &HashMap<String, u8>) -> bool {
    if a.existing != b.existing {
        return a.existing;
    }
    if (a.recall.match_confidence - b.recall.match_confidence).abs() > f64::EPSILON {
        return a.recall.match_confidence > b.recall.match_confidence;
    }
    if a.recall.updated_at != b.recall.updated_at {
        return a.recall.updated_at > b.recall.updated_at;
    }
    priority_of(&a.recall, priorities) <= priority_of(&b.recall, priorities)
}

fn priority_of(recall: &Recall, priorities: &HashMap<String, u8>) -> u8 {
    priorities.get(&recall.source_agency).copied().unwrap_or(u8::MAX)
}

/// Fold `absorbed` into `survivor`
fn merge_recall(
    survivor: &mut Recall,
    absorbed: &Recall,
    score: f64,
    ambiguous: bool,
    priorities: &HashMap<String, u8>,
    now: DateTime<Utc>,
) {
    // Scalars come from the higher-confidence row, but empty fields always
    // fill from the other side.
    let absorbed_wins = scalar_donor_is_absorbed(survivor, absorbed, priorities);
    if absorbed_wins {
        copy_nonempty(&absorbed.product_name, &mut survivor.product_name);
        copy_nonempty(&absorbed.brand, &mut survivor.brand);
        copy_nonempty(&absorbed.category, &mut survivor.category);
        copy_nonempty(&absorbed.hazard_description, &mut survivor.hazard_description);
        copy_nonempty(&absorbed.country, &mut survivor.country);
        survivor.recall_date = absorbed.recall_date;
    } else {
        fill_if_empty(&mut survivor.product_name, &absorbed.product_name);
        fill_if_empty(&mut survivor.brand, &absorbed.brand);
        fill_if_empty(&mut survivor.category, &absorbed.category);
        fill_if_empty(&mut survivor.hazard_description, &absorbed.hazard_description);
        fill_if_empty(&mut survivor.country, &absorbed.country);
    }

    // Hazard type: the more severe of the two wins, so the merged row's
    // risk score reflects the worst reported hazard.
    if hazard_weight(&absorbed.hazard_type) > hazard_weight(&survivor.hazard_type) {
        survivor.hazard_type = absorbed.hazard_type.clone();
    }

    survivor
        .model_numbers
        .extend(absorbed.model_numbers.iter().cloned());
    survivor
        .identifying_codes
        .extend(absorbed.identifying_codes.iter().cloned());

    survivor.merged_from.extend(absorbed.all_refs());
    let origin = survivor.origin_ref();
    survivor.merged_from.remove(&origin);

    let mut confidence = survivor.match_confidence.min(absorbed.match_confidence);
    if ambiguous {
        confidence = confidence.min(score);
    }
    survivor.match_confidence = confidence;
    survivor.updated_at = now;
}

fn scalar_donor_is_absorbed(
    survivor: &Recall,
    absorbed: &Recall,
    priorities: &HashMap<String, u8>,
) -> bool {
    if (absorbed.match_confidence - survivor.match_confidence).abs() > f64::EPSILON {
        return absorbed.match_confidence > survivor.match_confidence;
    }
    if absorbed.updated_at != survivor.updated_at {
        return absorbed.updated_at > survivor.updated_at;
    }
    priority_of(absorbed, priorities) < priority_of(survivor, priorities)
}

fn copy_nonempty(from: &str, to: &mut String) {
    if !from.trim().is_empty() {
        *to = from.to_string();
    }
}

fn fill_if_empty(target: &mut String, fallback: &str) {
    if target.trim().is_empty() && !fallback.trim().is_empty() {
        *target = fallback.to_string();
    }
}

/// Refresh a canonical row after its source re-published the record
fn refresh_from_draft(recall: &mut Recall, draft: &RecallDraft, confidence: f64, now: DateTime<Utc>) {
    copy_nonempty(&draft.product_name, &mut recall.product_name);
    copy_nonempty(&draft.brand, &mut recall.brand);
    copy_nonempty(&draft.category, &mut recall.category);
    copy_nonempty(&draft.hazard_type, &mut recall.hazard_type);
    copy_nonempty(&draft.hazard_description, &mut recall.hazard_description);
    copy_nonempty(&draft.country, &mut recall.country);
    recall.recall_date = draft.recall_date;
    recall
        .model_numbers
        .extend(draft.model_numbers.iter().cloned());
    recall
        .identifying_codes
        .extend(draft.identifying_codes.iter().cloned());
    recall.match_confidence = recall.match_confidence.min(confidence.clamp(0.0, 1.0));
    recall.updated_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use chrono::NaiveDate;

    fn draft(
        agency: &str,
        record_id: &str,
        name: &str,
        brand: &str,
        date: (i32, u32, u32),
    ) -> DraftEntry {
        let payload = serde_json::json!({"name": name, "id": record_id});
        DraftEntry {
            draft: RecallDraft {
                source_agency: agency.to_string(),
                source_record_id: record_id.to_string(),
                product_name: name.to_string(),
                brand: brand.to_string(),
                model_numbers: BTreeSet::new(),
                identifying_codes: BTreeSet::new(),
                category: "nursery".to_string(),
                hazard_type: "fall".to_string(),
                hazard_description: "wheel detaches".to_string(),
                country: "US".to_string(),
                recall_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            },
            confidence: 1.0,
            content_hash: crate::types::hash_payload(&payload),
        }
    }

    async fn commit(pool: &SqlitePool, outcome: &DedupOutcome) {
        for recall in &outcome.upserts {
            db::recalls::save_recall(pool, recall).await.unwrap();
        }
        for (absorbed, survivor) in &outcome.folds {
            db::recalls::repoint_raw_index(pool, *absorbed, *survivor)
                .await
                .unwrap();
            db::recalls::delete_recall(pool, *absorbed).await.unwrap();
        }
        for (raw_ref, id, hash) in &outcome.raw_index {
            db::recalls::upsert_raw_index(pool, raw_ref, *id, hash)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn cross_agency_reports_of_one_recall_merge() {
        let pool = init_memory_pool().await.unwrap();
        let dedup = Deduplicator::new(&pool, DedupConfig::default());

        let outcome = dedup
            .dedupe_batch(vec![
                draft("X", "123", "Acme Stroller", "Acme", (2024, 1, 10)),
                draft("Y", "987", "ACME Strollers Model 5", "ACME", (2024, 1, 12)),
            ])
            .await
            .unwrap();

        assert_eq!(outcome.records_new, 1);
        assert_eq!(outcome.records_merged, 1);
        assert_eq!(outcome.upserts.len(), 1);

        let merged = &outcome.upserts[0];
        let refs: Vec<String> = merged.all_refs().iter().map(|r| r.compact()).collect();
        assert!(refs.contains(&"X:123".to_string()));
        assert!(refs.contains(&"Y:987".to_string()));

        // Both raw refs resolve to the same canonical id
        assert_eq!(outcome.raw_index.len(), 2);
        assert_eq!(outcome.raw_index[0].1, outcome.raw_index[1].1);
    }

    #[tokio::test]
    async fn dissimilar_products_stay_separate() {
        let pool = init_memory_pool().await.unwrap();
        let dedup = Deduplicator::new(&pool, DedupConfig::default());

        let outcome = dedup
            .dedupe_batch(vec![
                draft("X", "1", "Acme Stroller", "Acme", (2024, 1, 10)),
                draft("X", "2", "Acme Space Heater", "Acme", (2024, 1, 10)),
            ])
            .await
            .unwrap();

        assert_eq!(outcome.records_new, 2);
        assert_eq!(outcome.records_merged, 0);
        assert_eq!(outcome.upserts.len(), 2);
    }

    #[tokio::test]
    async fn reingesting_identical_batch_is_a_no_op() {
        let pool = init_memory_pool().await.unwrap();
        let dedup = Deduplicator::new(&pool, DedupConfig::default());

        let batch = vec![
            draft("X", "123", "Acme Stroller", "Acme", (2024, 1, 10)),
            draft("Y", "987", "ACME Strollers Model 5", "ACME", (2024, 1, 12)),
        ];

        let first = dedup.dedupe_batch(batch.clone()).await.unwrap();
        commit(&pool, &first).await;

        let second = dedup.dedupe_batch(batch).await.unwrap();
        assert_eq!(second.records_new, 0);
        assert_eq!(second.records_merged, 0);
        assert_eq!(second.records_unchanged, 2);
        assert!(second.upserts.is_empty());
    }

    #[tokio::test]
    async fn merge_is_order_independent() {
        let reports = [
            ("A", "1", "Acme Stroller", "Acme", (2024, 1, 10)),
            ("B", "2", "ACME Strollers Model 5", "ACME", (2024, 1, 12)),
            ("C", "3", "Acme Stroller Mod 5", "Acme", (2024, 1, 11)),
        ];

        let mut canonical_counts = Vec::new();
        // Forward and reverse arrival order must give the same partition
        for order in [[0usize, 1, 2], [2, 1, 0]] {
            let pool = init_memory_pool().await.unwrap();
            let dedup = Deduplicator::new(&pool, DedupConfig::default());
            let batch: Vec<DraftEntry> = order
                .iter()
                .map(|&i| {
                    let (a, r, n, b, d) = reports[i];
                    draft(a, r, n, b, d)
                })
                .collect();
            let outcome = dedup.dedupe_batch(batch).await.unwrap();
            commit(&pool, &outcome).await;
            canonical_counts.push(db::recalls::count(&pool).await.unwrap());
        }

        assert_eq!(canonical_counts, vec![1, 1]);
    }

    #[tokio::test]
    async fn later_batch_merges_into_stored_row_and_folds() {
        let pool = init_memory_pool().await.unwrap();
        let dedup = Deduplicator::new(&pool, DedupConfig::default());

        let first = dedup
            .dedupe_batch(vec![draft("X", "123", "Acme Stroller", "Acme", (2024, 1, 10))])
            .await
            .unwrap();
        commit(&pool, &first).await;
        let first_id = first.upserts[0].id;

        let second = dedup
            .dedupe_batch(vec![draft(
                "Y",
                "987",
                "ACME Strollers Model 5",
                "ACME",
                (2024, 1, 12),
            )])
            .await
            .unwrap();
        commit(&pool, &second).await;

        // The stored row survives with its original id
        assert_eq!(second.records_merged, 1);
        assert_eq!(second.upserts.len(), 1);
        assert_eq!(second.upserts[0].id, first_id);
        assert_eq!(db::recalls::count(&pool).await.unwrap(), 1);

        let merged = db::recalls::load_recall(&pool, first_id).await.unwrap().unwrap();
        assert!(merged.all_refs().contains(&RawRef::new("Y", "987")));
    }

    #[tokio::test]
    async fn changed_content_refreshes_in_place() {
        let pool = init_memory_pool().await.unwrap();
        let dedup = Deduplicator::new(&pool, DedupConfig::default());

        let first = dedup
            .dedupe_batch(vec![draft("X", "123", "Acme Stroller", "Acme", (2024, 1, 10))])
            .await
            .unwrap();
        commit(&pool, &first).await;
        let id = first.upserts[0].id;

        let mut updated = draft("X", "123", "Acme Stroller Deluxe", "Acme", (2024, 1, 10));
        updated.content_hash = crate::types::hash_payload(&serde_json::json!({"v": 2}));

        let second = dedup.dedupe_batch(vec![updated]).await.unwrap();
        commit(&pool, &second).await;

        assert_eq!(second.records_new, 0);
        assert_eq!(second.records_merged, 1);
        assert_eq!(db::recalls::count(&pool).await.unwrap(), 1);
        let row = db::recalls::load_recall(&pool, id).await.unwrap().unwrap();
        assert_eq!(row.product_name, "Acme Stroller Deluxe");
    }

    #[tokio::test]
    async fn near_threshold_merge_lowers_match_confidence() {
        let pool = init_memory_pool().await.unwrap();
        let config = DedupConfig {
            merge_threshold: 0.70,
            flag_threshold: 0.99,
            ..DedupConfig::default()
        };
        let dedup = Deduplicator::new(&pool, config);

        let outcome = dedup
            .dedupe_batch(vec![
                draft("X", "1", "Acme Stroller", "Acme", (2024, 1, 10)),
                draft("Y", "2", "Acme Strolller Pro", "Acme", (2024, 1, 25)),
            ])
            .await
            .unwrap();

        assert_eq!(outcome.records_merged, 1);
        let merged = &outcome.upserts[0];
        assert!(
            merged.match_confidence < 1.0,
            "ambiguous merge must not keep full confidence, got {}",
            merged.match_confidence
        );
    }
}
