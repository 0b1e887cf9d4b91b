//! rhub-ingest - Recall Ingestion Service
//!
//! Aggregates product-safety recall notices from independent regulatory
//! sources, normalizes them into one canonical schema, deduplicates records
//! describing the same real-world recall, scores each recall's risk, and
//! maintains a fuzzy-search index over the result.
//!
//! Exposes the control/query API over HTTP for the web layer and ops
//! tooling.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use rhub_common::events::EventBus;
use rhub_ingest::config::IngestConfig;
use rhub_ingest::connectors::ConnectorRegistry;
use rhub_ingest::ingest::{IngestOrchestrator, RecalcScope};
use rhub_ingest::scheduler::{Scheduler, SchedulerHooks, SystemClock};
use rhub_ingest::search::SearchIndex;
use rhub_ingest::AppState;

const BIND_ADDR: &str = "127.0.0.1:5831";

/// Scheduler wiring over the orchestrator
struct OrchestratorHooks {
    orchestrator: Arc<IngestOrchestrator>,
}

#[async_trait]
impl SchedulerHooks for OrchestratorHooks {
    async fn run_ingestion(&self) -> rhub_common::Result<()> {
        let run = self.orchestrator.start_run(None, None).await?;
        self.orchestrator
            .execute_run(run, CancellationToken::new())
            .await?;
        Ok(())
    }

    async fn run_risk_recalculation(&self) -> rhub_common::Result<()> {
        self.orchestrator.recalculate_risk(RecalcScope::All).await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG wins, then the TOML config, then info
    let toml_config = rhub_common::config::load_toml_config().unwrap_or_default();
    let log_filter = std::env::var("RUST_LOG")
        .ok()
        .or(toml_config.log_filter)
        .unwrap_or_else(|| "info".to_string());
    fmt().with_env_filter(EnvFilter::new(log_filter)).init();

    info!("Starting rhub-ingest (Recall Ingestion) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve the data directory and open the database
    let data_dir = rhub_common::config::resolve_data_dir(None, "RHUB_DATA_DIR");
    let db_path = rhub_common::config::ensure_data_dir(&data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to initialize data directory: {}", e))?;
    info!("Database: {}", db_path.display());

    let db = rhub_ingest::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Runs orphaned by a previous process will never progress
    let cleaned = rhub_ingest::db::runs::cleanup_stale_runs(&db).await?;
    if cleaned > 0 {
        info!(cleaned, "Marked stale ingestion runs as cancelled");
    }

    let config = IngestConfig::load(&db).await?;
    info!(
        max_concurrent_sources = config.max_concurrent_sources,
        merge_threshold = config.merge_threshold,
        "Configuration resolved"
    );

    let registry = Arc::new(ConnectorRegistry::builtin(config.lookback_days));
    info!(sources = registry.len(), "Connector registry initialized");

    // Rebuild the search index from the canonical store
    let search = Arc::new(SearchIndex::new());
    let rows = rhub_ingest::db::recalls::load_all(&db).await?;
    search.rebuild(&rows).await;

    let event_bus = EventBus::new(1000);

    let orchestrator = Arc::new(IngestOrchestrator::new(
        db.clone(),
        registry,
        search.clone(),
        event_bus.clone(),
        config.clone(),
    ));

    // Recurring triggers: ingestion cycle + risk recalculation cycle
    let scheduler = Arc::new(Scheduler::new(
        db.clone(),
        Arc::new(SystemClock),
        Arc::new(OrchestratorHooks {
            orchestrator: orchestrator.clone(),
        }),
        &config,
    ));
    let scheduler_cancel = CancellationToken::new();
    tokio::spawn(scheduler.run(scheduler_cancel.clone()));
    info!("Scheduler started");

    let state = AppState::new(db, event_bus, search, orchestrator);
    let app = rhub_ingest::build_router(state);

    let listener = tokio::net::TcpListener::bind(BIND_ADDR).await?;
    info!("Listening on http://{}", BIND_ADDR);

    axum::serve(listener, app).await?;

    scheduler_cancel.cancel();

    Ok(())
}
