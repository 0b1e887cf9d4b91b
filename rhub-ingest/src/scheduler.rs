//! Scheduler
//!
//! Two independent recurring triggers: the full ingestion cycle (every N
//! hours) and the risk-recalculation cycle (shorter cadence). The
//! last-fire timestamp for each cycle is persisted in the settings table,
//! so a restart neither double-fires a missed trigger nor forgets one: a
//! cycle fires when `now - last_fire >= interval`, once, and the work
//! itself is idempotent. The contract is "at least once, roughly on
//! schedule", never "exactly once".
//!
//! The clock is injected so tests can simulate missed and late triggers
//! deterministically.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::IngestConfig;
use crate::db::settings::{get_setting, set_setting};
use rhub_common::Result;

/// Injectable time source
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation used in production
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Work the scheduler triggers; implemented by the service wiring over the
/// orchestrator, and by counters in tests
#[async_trait]
pub trait SchedulerHooks: Send + Sync {
    async fn run_ingestion(&self) -> Result<()>;
    async fn run_risk_recalculation(&self) -> Result<()>;
}

/// The two recurring cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    Ingestion,
    RiskRecalculation,
}

impl CycleKind {
    fn settings_key(self) -> &'static str {
        match self {
            CycleKind::Ingestion => "scheduler.last_ingest_at",
            CycleKind::RiskRecalculation => "scheduler.last_risk_at",
        }
    }

    fn label(self) -> &'static str {
        match self {
            CycleKind::Ingestion => "ingestion",
            CycleKind::RiskRecalculation => "risk-recalculation",
        }
    }
}

/// Crash-safe recurring trigger service
pub struct Scheduler {
    db: SqlitePool,
    clock: Arc<dyn Clock>,
    hooks: Arc<dyn SchedulerHooks>,
    ingest_interval: ChronoDuration,
    risk_interval: ChronoDuration,
}

/// Upper bound between due-checks, so interval changes in the settings
/// table take effect without a restart
const MAX_POLL: Duration = Duration::from_secs(3600);
const MIN_POLL: Duration = Duration::from_secs(1);

impl Scheduler {
    pub fn new(
        db: SqlitePool,
        clock: Arc<dyn Clock>,
        hooks: Arc<dyn SchedulerHooks>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            db,
            clock,
            hooks,
            ingest_interval: ChronoDuration::hours(config.ingest_interval_hours.max(1) as i64),
            risk_interval: ChronoDuration::hours(config.risk_interval_hours.max(1) as i64),
        }
    }

    fn interval_for(&self, kind: CycleKind) -> ChronoDuration {
        match kind {
            CycleKind::Ingestion => self.ingest_interval,
            CycleKind::RiskRecalculation => self.risk_interval,
        }
    }

    /// Fire one cycle if it is due; returns whether it fired
    ///
    /// The last-fire stamp is written only after the work completes, so a
    /// crash mid-cycle re-fires on restart (at-least-once).
    pub async fn tick(&self, kind: CycleKind) -> Result<bool> {
        let now = self.clock.now();
        let last = self.last_fired(kind).await?;
        let due = match last {
            None => true,
            Some(last) => now - last >= self.interval_for(kind),
        };
        if !due {
            return Ok(false);
        }

        tracing::info!(cycle = kind.label(), "Scheduled cycle due, firing");
        match kind {
            CycleKind::Ingestion => self.hooks.run_ingestion().await?,
            CycleKind::RiskRecalculation => self.hooks.run_risk_recalculation().await?,
        }

        set_setting(&self.db, kind.settings_key(), &now.to_rfc3339()).await?;
        Ok(true)
    }

    async fn last_fired(&self, kind: CycleKind) -> Result<Option<DateTime<Utc>>> {
        Ok(get_setting(&self.db, kind.settings_key())
            .await?
            .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    /// Time until the next due fire, clamped to the poll bounds
    async fn sleep_until_due(&self, kind: CycleKind) -> Result<Duration> {
        let now = self.clock.now();
        let remaining = match self.last_fired(kind).await? {
            None => ChronoDuration::zero(),
            Some(last) => (last + self.interval_for(kind)) - now,
        };
        let remaining = remaining.to_std().unwrap_or(Duration::ZERO);
        Ok(remaining.clamp(MIN_POLL, MAX_POLL))
    }

    /// Drive one cycle kind until cancelled
    pub async fn run_cycle(&self, kind: CycleKind, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.tick(kind).await {
                // A failed cycle is retried on the next due-check; the work
                // is idempotent so re-firing is safe.
                tracing::error!(cycle = kind.label(), error = %e, "Scheduled cycle failed");
            }
            let sleep_for = match self.sleep_until_due(kind).await {
                Ok(d) => d,
                Err(e) => {
                    tracing::error!(cycle = kind.label(), error = %e, "Failed to compute next fire time");
                    MAX_POLL
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.clock.sleep(sleep_for) => {}
            }
        }
        tracing::info!(cycle = kind.label(), "Scheduler cycle stopped");
    }

    /// Drive both cycles until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let ingest = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { this.run_cycle(CycleKind::Ingestion, cancel).await })
        };
        let risk = {
            let this = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                this.run_cycle(CycleKind::RiskRecalculation, cancel).await
            })
        };
        let _ = ingest.await;
        let _ = risk.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_pool;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct MockClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl MockClock {
        fn at(now: DateTime<Utc>) -> Self {
            Self { now: Mutex::new(now) }
        }

        fn advance(&self, delta: ChronoDuration) {
            let mut now = self.now.lock().unwrap();
            *now = *now + delta;
        }
    }

    #[async_trait]
    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }

        async fn sleep(&self, _duration: Duration) {}
    }

    #[derive(Default)]
    struct CountingHooks {
        ingestions: AtomicU32,
        recalcs: AtomicU32,
    }

    #[async_trait]
    impl SchedulerHooks for CountingHooks {
        async fn run_ingestion(&self) -> Result<()> {
            self.ingestions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn run_risk_recalculation(&self) -> Result<()> {
            self.recalcs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_config() -> IngestConfig {
        IngestConfig {
            ingest_interval_hours: 72,
            risk_interval_hours: 24,
            ..IngestConfig::default()
        }
    }

    #[tokio::test]
    async fn first_tick_fires_immediately() {
        let pool = init_memory_pool().await.unwrap();
        let clock = Arc::new(MockClock::at(Utc::now()));
        let hooks = Arc::new(CountingHooks::default());
        let scheduler = Scheduler::new(pool, clock, hooks.clone(), &test_config());

        assert!(scheduler.tick(CycleKind::Ingestion).await.unwrap());
        assert_eq!(hooks.ingestions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn tick_does_not_refire_before_interval() {
        let pool = init_memory_pool().await.unwrap();
        let clock = Arc::new(MockClock::at(Utc::now()));
        let hooks = Arc::new(CountingHooks::default());
        let scheduler = Scheduler::new(pool, clock.clone(), hooks.clone(), &test_config());

        assert!(scheduler.tick(CycleKind::Ingestion).await.unwrap());
        clock.advance(ChronoDuration::hours(1));
        assert!(!scheduler.tick(CycleKind::Ingestion).await.unwrap());
        assert_eq!(hooks.ingestions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missed_trigger_fires_once_not_per_missed_interval() {
        let pool = init_memory_pool().await.unwrap();
        let clock = Arc::new(MockClock::at(Utc::now()));
        let hooks = Arc::new(CountingHooks::default());
        let scheduler = Scheduler::new(pool, clock.clone(), hooks.clone(), &test_config());

        assert!(scheduler.tick(CycleKind::Ingestion).await.unwrap());

        // Process was down for four intervals
        clock.advance(ChronoDuration::hours(4 * 72));

        assert!(scheduler.tick(CycleKind::Ingestion).await.unwrap());
        assert!(!scheduler.tick(CycleKind::Ingestion).await.unwrap());
        assert_eq!(hooks.ingestions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn cycles_are_independent() {
        let pool = init_memory_pool().await.unwrap();
        let clock = Arc::new(MockClock::at(Utc::now()));
        let hooks = Arc::new(CountingHooks::default());
        let scheduler = Scheduler::new(pool, clock.clone(), hooks.clone(), &test_config());

        assert!(scheduler.tick(CycleKind::Ingestion).await.unwrap());
        assert!(scheduler.tick(CycleKind::RiskRecalculation).await.unwrap());

        // A day later only the risk cycle is due again
        clock.advance(ChronoDuration::hours(25));
        assert!(!scheduler.tick(CycleKind::Ingestion).await.unwrap());
        assert!(scheduler.tick(CycleKind::RiskRecalculation).await.unwrap());

        assert_eq!(hooks.ingestions.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.recalcs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn last_fire_survives_scheduler_restart() {
        let pool = init_memory_pool().await.unwrap();
        let start = Utc::now();
        let hooks = Arc::new(CountingHooks::default());

        {
            let clock = Arc::new(MockClock::at(start));
            let scheduler =
                Scheduler::new(pool.clone(), clock, hooks.clone(), &test_config());
            assert!(scheduler.tick(CycleKind::Ingestion).await.unwrap());
        }

        // New scheduler instance over the same database, one hour later
        let clock = Arc::new(MockClock::at(start + ChronoDuration::hours(1)));
        let scheduler = Scheduler::new(pool, clock, hooks.clone(), &test_config());
        assert!(!scheduler.tick(CycleKind::Ingestion).await.unwrap());
        assert_eq!(hooks.ingestions.load(Ordering::SeqCst), 1);
    }
}
