//! Ingestion Orchestrator
//!
//! Drives configured sources through fetch → normalize → dedupe → commit as
//! isolated units inside a bounded-concurrency pool. One source exhausting
//! its retries, drifting schema, or timing out never cancels the others;
//! the run only finishes FAILED when every attempted source failed.
//!
//! Ordering guarantee per source: the batch transaction commits strictly
//! before the watermark advances. A crash between the two re-fetches the
//! same window next run, and the dedup short-circuit absorbs the replay.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::connectors::{ConnectorRegistry, RegisteredSource};
use crate::db;
use crate::dedup::{DedupConfig, DedupOutcome, Deduplicator, DraftEntry};
use crate::ingest::backoff::{fetch_with_retry, BackoffPolicy};
use crate::models::{IngestionRun, RunState, SourceOutcome};
use crate::normalizer::mapping::authority_weight_for_agency;
use crate::normalizer::normalize;
use crate::scoring;
use crate::search::SearchIndex;
use crate::types::FetchError;
use crate::utils::retry_on_lock;
use rhub_common::events::{EventBus, RecallEvent};
use rhub_common::{Error, Result};

/// Per-source async locks serializing overlapping runs on the same source
///
/// Runs targeting disjoint sources proceed independently; runs targeting
/// the same source queue on its lock for the duration of that source's
/// fetch+commit unit.
#[derive(Default)]
pub struct SourceLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock_for(&self, code: &str) -> Arc<Mutex<()>> {
        let mut map = self.inner.lock().await;
        map.entry(code.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Scope of a risk recalculation cycle
#[derive(Debug, Clone, Copy)]
pub enum RecalcScope {
    All,
    ChangedSince(DateTime<Utc>),
}

/// Result of a risk recalculation cycle
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RiskRecalcSummary {
    pub scanned: usize,
    pub updated: usize,
}

/// The only component with cross-cutting visibility over the pipeline
#[derive(Clone)]
pub struct IngestOrchestrator {
    db: SqlitePool,
    registry: Arc<ConnectorRegistry>,
    search: Arc<SearchIndex>,
    event_bus: EventBus,
    config: IngestConfig,
    locks: Arc<SourceLocks>,
    /// Serializes dedupe+commit sections across sources: candidate lookup
    /// against the store and the batch commit must be atomic with respect
    /// to each other, or two sources first seeing the same recall
    /// concurrently would each create a canonical row
    dedup_commit_lock: Arc<Mutex<()>>,
}

impl IngestOrchestrator {
    pub fn new(
        db: SqlitePool,
        registry: Arc<ConnectorRegistry>,
        search: Arc<SearchIndex>,
        event_bus: EventBus,
        config: IngestConfig,
    ) -> Self {
        Self {
            db,
            registry,
            search,
            event_bus,
            config,
            locks: Arc::new(SourceLocks::new()),
            dedup_commit_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Create and persist a pending run; the caller decides where to
    /// execute it (background task for the API, inline for the scheduler)
    pub async fn start_run(
        &self,
        sources: Option<Vec<String>>,
        lookback_days: Option<u32>,
    ) -> Result<IngestionRun> {
        let sources = match sources {
            Some(list) if !list.is_empty() => {
                for code in &list {
                    if self.registry.get(code).is_none() {
                        return Err(Error::InvalidInput(format!("unknown source: {}", code)));
                    }
                }
                list
            }
            _ => self.registry.codes(),
        };

        let run = IngestionRun::new(sources, lookback_days.unwrap_or(self.config.lookback_days));
        db::runs::save_run(&self.db, &run).await?;
        Ok(run)
    }

    /// Execute a run to completion
    ///
    /// Per-source failures land in the run summary, never in this result;
    /// only a failure to persist the summary itself surfaces as an error.
    pub async fn execute_run(
        &self,
        mut run: IngestionRun,
        cancel: CancellationToken,
    ) -> Result<IngestionRun> {
        tracing::info!(
            run_id = %run.run_id,
            sources = run.sources.len(),
            lookback_days = run.lookback_days,
            "Starting ingestion run"
        );

        run.transition_to(RunState::Running);
        db::runs::save_run(&self.db, &run).await?;
        let _ = self.event_bus.emit(RecallEvent::RunStarted {
            run_id: run.run_id,
            sources: run.sources.clone(),
            timestamp: Utc::now(),
        });

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_sources.max(1)));
        let mut join_set: JoinSet<SourceOutcome> = JoinSet::new();

        for code in run.sources.clone() {
            let this = self.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let run_id = run.run_id;
            let lookback = run.lookback_days;
            join_set.spawn(async move {
                if cancel.is_cancelled() {
                    return SourceOutcome::not_attempted(code);
                }
                tokio::select! {
                    // Cancellation stops scheduling new source work; units
                    // already holding a permit run to completion below.
                    _ = cancel.cancelled() => SourceOutcome::not_attempted(code),
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(_permit) => this.run_source(run_id, code, lookback).await,
                        Err(_) => SourceOutcome::not_attempted(code),
                    },
                }
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(run_id = %run.run_id, error = %e, "Source task aborted");
                    SourceOutcome::failed("unknown", format!("source task aborted: {}", e))
                }
            };
            run.outcomes.push(outcome);
            // Progress saves are best-effort; the final summary save is not.
            if let Err(e) = db::runs::save_run(&self.db, &run).await {
                tracing::warn!(run_id = %run.run_id, error = %e, "Failed to persist run progress");
            }
        }

        run.finalize(cancel.is_cancelled());
        db::runs::save_run(&self.db, &run).await?;

        let _ = self.event_bus.emit(RecallEvent::RunFinished {
            run_id: run.run_id,
            state: format!("{:?}", run.state),
            sources_succeeded: run.sources_succeeded(),
            sources_failed: run.sources_failed(),
            timestamp: Utc::now(),
        });

        tracing::info!(
            run_id = %run.run_id,
            state = ?run.state,
            succeeded = run.sources_succeeded(),
            failed = run.sources_failed(),
            "Ingestion run finished"
        );

        Ok(run)
    }

    /// One source's isolated unit: lock, fetch with retry, normalize,
    /// dedupe, commit, advance watermark, refresh index
    async fn run_source(&self, run_id: Uuid, code: String, lookback_days: u32) -> SourceOutcome {
        let started = std::time::Instant::now();

        let Some(source) = self.registry.get(&code).cloned() else {
            return SourceOutcome::failed(code, "source not registered");
        };

        let _ = self.event_bus.emit(RecallEvent::SourceStarted {
            run_id,
            source_code: code.clone(),
            timestamp: Utc::now(),
        });

        // Serialize with any overlapping run targeting the same source.
        let lock = self.locks.lock_for(&code).await;
        let _guard = lock.lock().await;

        let timeout = Duration::from_secs(self.config.source_timeout_secs.max(1));
        let mut outcome =
            match tokio::time::timeout(timeout, self.source_unit(&source, lookback_days)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(
                        source = %code,
                        timeout_secs = timeout.as_secs(),
                        "Source unit timed out, failing for this run"
                    );
                    SourceOutcome::failed(
                        &code,
                        format!("timed out after {}s", timeout.as_secs()),
                    )
                }
            };
        outcome.duration_ms = started.elapsed().as_millis() as u64;

        if outcome.succeeded {
            let _ = self.event_bus.emit(RecallEvent::SourceCompleted {
                run_id,
                source_code: code,
                records_fetched: outcome.records_fetched,
                records_new: outcome.records_new,
                records_merged: outcome.records_merged,
                timestamp: Utc::now(),
            });
        } else {
            let _ = self.event_bus.emit(RecallEvent::SourceFailed {
                run_id,
                source_code: code,
                error: outcome.error.clone().unwrap_or_default(),
                timestamp: Utc::now(),
            });
        }

        outcome
    }

    async fn source_unit(&self, source: &RegisteredSource, lookback_days: u32) -> SourceOutcome {
        let code = source.spec.code;
        let mut outcome = SourceOutcome::not_attempted(code);
        outcome.attempted = true;

        let cursor = match db::watermarks::get_watermark(&self.db, code).await {
            Ok(cursor) => cursor,
            Err(e) => {
                outcome.error = Some(format!("watermark load failed: {}", e));
                return outcome;
            }
        };
        // Window-only sources ignore the cursor and refetch their lookback;
        // incremental sources without a watermark start at the run's
        // lookback window.
        let cursor = if source.connector.caps().incremental_fetch {
            cursor.or_else(|| {
                let start =
                    Utc::now().date_naive() - chrono::Duration::days(i64::from(lookback_days));
                Some(start.format("%Y-%m-%d").to_string())
            })
        } else {
            None
        };

        let policy = BackoffPolicy::from_config(&self.config);
        let (fetched, stats) =
            fetch_with_retry(source.connector.as_ref(), cursor.as_deref(), &policy).await;
        outcome.rate_limited_waits = stats.rate_limited_waits;

        let output = match fetched {
            Ok(output) => output,
            Err(err) => {
                match &err {
                    FetchError::SchemaChanged(msg) => tracing::error!(
                        source = %code,
                        alert = true,
                        error = %msg,
                        "Source schema drift, disabled for this run"
                    ),
                    FetchError::Auth(msg) => tracing::error!(
                        source = %code,
                        alert = true,
                        error = %msg,
                        "Source authentication failure"
                    ),
                    _ => tracing::warn!(
                        source = %code,
                        error = %err,
                        "Source fetch failed after retries"
                    ),
                }
                outcome.error = Some(err.to_string());
                return outcome;
            }
        };
        outcome.records_fetched = output.records.len();

        let mut entries = Vec::with_capacity(output.records.len());
        for raw in &output.records {
            match normalize(raw, source.spec) {
                Ok((draft, confidence)) => entries.push(DraftEntry {
                    draft,
                    confidence,
                    content_hash: raw.content_hash.clone(),
                }),
                Err(e) => {
                    outcome.records_skipped += 1;
                    tracing::warn!(
                        source = %code,
                        record_id = %raw.source_record_id,
                        error = %e,
                        "Skipping unparseable record"
                    );
                }
            }
        }

        // Fetch and normalize ran concurrently with other sources; from
        // candidate lookup through commit this unit holds the global
        // dedupe-commit section.
        let _dedup_guard = self.dedup_commit_lock.lock().await;

        let dedup_config = DedupConfig {
            merge_threshold: self.config.merge_threshold,
            flag_threshold: self.config.flag_threshold,
            source_priorities: self.registry.source_priorities(),
        };
        let mut batch = match Deduplicator::new(&self.db, dedup_config)
            .dedupe_batch(entries)
            .await
        {
            Ok(batch) => batch,
            Err(e) => {
                outcome.error = Some(format!("dedup failed: {}", e));
                return outcome;
            }
        };

        // Merges changed row inputs; re-derive risk scores before commit.
        let now = Utc::now();
        for recall in &mut batch.upserts {
            recall.risk_score = scoring::score(
                recall,
                authority_weight_for_agency(&recall.source_agency),
                now,
            );
        }

        if let Err(e) = self.commit_batch(&batch).await {
            // Watermark untouched: the next run re-fetches this window.
            outcome.error = Some(format!("commit failed: {}", e));
            return outcome;
        }

        // Strictly after the batch commit.
        if let Err(e) = db::watermarks::advance_watermark(&self.db, code, &output.next_cursor).await
        {
            // The batch is durable; replaying the window next run is safe.
            tracing::warn!(source = %code, error = %e, "Watermark advance failed after commit");
        }

        let removed: Vec<Uuid> = batch.folds.iter().map(|(absorbed, _)| *absorbed).collect();
        self.search.apply(&batch.upserts, &removed).await;
        let _ = self.event_bus.emit(RecallEvent::IndexRefreshed {
            documents: self.search.len().await,
            timestamp: Utc::now(),
        });

        outcome.records_new = batch.records_new;
        outcome.records_merged = batch.records_merged;
        outcome.records_unchanged = batch.records_unchanged;
        outcome.succeeded = true;

        tracing::info!(
            source = %code,
            fetched = outcome.records_fetched,
            new = outcome.records_new,
            merged = outcome.records_merged,
            unchanged = outcome.records_unchanged,
            skipped = outcome.records_skipped,
            "Source batch committed"
        );

        outcome
    }

    /// Commit one source batch transactionally: all rows or none
    async fn commit_batch(&self, batch: &DedupOutcome) -> Result<()> {
        let pool = &self.db;
        retry_on_lock("batch commit", self.config.commit_max_wait_ms, move || async move {
            let mut tx = pool.begin().await?;
            for recall in &batch.upserts {
                db::recalls::save_recall(&mut *tx, recall).await?;
            }
            for (absorbed, survivor) in &batch.folds {
                db::recalls::repoint_raw_index(&mut *tx, *absorbed, *survivor).await?;
                db::recalls::delete_recall(&mut *tx, *absorbed).await?;
            }
            for (raw_ref, recall_id, content_hash) in &batch.raw_index {
                db::recalls::upsert_raw_index(&mut *tx, raw_ref, *recall_id, content_hash).await?;
            }
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// Re-derive risk scores across the corpus (or rows changed since)
    ///
    /// Pure recomputation: identical inputs and time give identical scores,
    /// so the scheduler can fire this at-least-once without coordination.
    pub async fn recalculate_risk(&self, scope: RecalcScope) -> Result<RiskRecalcSummary> {
        let rows = match scope {
            RecalcScope::All => db::recalls::load_all(&self.db).await?,
            RecalcScope::ChangedSince(since) => {
                db::recalls::load_changed_since(&self.db, since).await?
            }
        };

        let now = Utc::now();
        let mut updated = 0usize;
        for recall in &rows {
            let fresh = scoring::score(
                recall,
                authority_weight_for_agency(&recall.source_agency),
                now,
            );
            if fresh != recall.risk_score {
                db::recalls::update_risk_score(&self.db, recall.id, fresh).await?;
                updated += 1;
            }
        }

        let summary = RiskRecalcSummary {
            scanned: rows.len(),
            updated,
        };
        let _ = self.event_bus.emit(RecallEvent::RiskRecalculated {
            scanned: summary.scanned,
            updated: summary.updated,
            timestamp: Utc::now(),
        });

        tracing::info!(
            scanned = summary.scanned,
            updated = summary.updated,
            "Risk recalculation finished"
        );

        Ok(summary)
    }
}
