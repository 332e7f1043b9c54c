use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::PgPool;
use tracing::{debug, error, info, warn};

use crate::actions::Executor;
use crate::config;
use crate::providers::status as provider_status;
use crate::sync::Reconciler;

/// What to do with a timer firing, given how late it is.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum TickDisposition {
    /// Start the run; `coalesced` firings collapsed into this one.
    Run { coalesced: u32 },
    /// The firing is past its grace window; drop it rather than queue it.
    Skip { missed: u32 },
}

/// key: misfire-policy
/// Fixed-interval cadence with a bounded misfire grace window. A run that is due
/// but late still starts inside the window; beyond it the firing is skipped, and
/// several missed firings coalesce into a single catch-up run.
#[derive(Debug)]
pub(crate) struct Cadence {
    interval: Duration,
    grace: Duration,
    next_due: Instant,
}

impl Cadence {
    pub(crate) fn new(interval: Duration, grace: Duration, now: Instant) -> Self {
        Self {
            interval,
            grace,
            next_due: now + interval,
        }
    }

    pub(crate) fn next_due(&self) -> Instant {
        self.next_due
    }

    /// Called when the timer wakes at `now`. Advances the schedule past `now` and
    /// decides whether the most recently passed due time is still within grace.
    pub(crate) fn observe(&mut self, now: Instant) -> TickDisposition {
        if now < self.next_due {
            return TickDisposition::Run { coalesced: 0 };
        }
        let mut last_due = self.next_due;
        let mut passed: u32 = 0;
        while self.next_due <= now {
            last_due = self.next_due;
            self.next_due += self.interval;
            passed += 1;
        }
        let lateness = now.duration_since(last_due);
        if lateness <= self.grace {
            TickDisposition::Run {
                coalesced: passed.saturating_sub(1),
            }
        } else {
            TickDisposition::Skip { missed: passed }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    pub sync_interval: Duration,
    pub sync_grace: Duration,
    pub execution_interval: Duration,
    pub execution_grace: Duration,
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        Self {
            sync_interval: Duration::from_secs(*config::SYNC_INTERVAL_SECS),
            sync_grace: Duration::from_secs(*config::SYNC_MISFIRE_GRACE_SECS),
            execution_interval: Duration::from_secs(*config::EXECUTION_INTERVAL_SECS),
            execution_grace: Duration::from_secs(*config::EXECUTION_MISFIRE_GRACE_SECS),
        }
    }
}

/// key: scheduler
/// Owns the two background timers: the per-provider reconciliation sweep and the
/// approved-action execution sweep. Injected where needed; `start` is idempotent
/// and the timers run for the life of the process.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    started: AtomicBool,
    pool: PgPool,
    reconciler: Reconciler,
    executor: Executor,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        pool: PgPool,
        reconciler: Reconciler,
        executor: Executor,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                started: AtomicBool::new(false),
                pool,
                reconciler,
                executor,
                config,
            }),
        }
    }

    /// Starts both timers exactly once. Calling again while running is a no-op.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            debug!("scheduler already running; ignoring start request");
            return;
        }
        info!(
            sync_interval_secs = self.inner.config.sync_interval.as_secs(),
            execution_interval_secs = self.inner.config.execution_interval.as_secs(),
            "starting background scheduler"
        );

        let sync_inner = self.inner.clone();
        tokio::spawn(async move {
            let interval = sync_inner.config.sync_interval;
            let grace = sync_inner.config.sync_grace;
            run_timer("reconciliation sweep", interval, grace, move || {
                sync_sweep(sync_inner.clone())
            })
            .await;
        });

        let exec_inner = self.inner.clone();
        tokio::spawn(async move {
            let interval = exec_inner.config.execution_interval;
            let grace = exec_inner.config.execution_grace;
            run_timer("execution sweep", interval, grace, move || {
                execution_sweep(exec_inner.clone())
            })
            .await;
        });
    }
}

async fn run_timer<F, Fut>(label: &'static str, interval: Duration, grace: Duration, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut cadence = Cadence::new(interval, grace, Instant::now());
    loop {
        tokio::time::sleep_until(tokio::time::Instant::from_std(cadence.next_due())).await;
        match cadence.observe(Instant::now()) {
            TickDisposition::Run { coalesced } => {
                if coalesced > 0 {
                    warn!(label, coalesced, "coalescing missed firings into one run");
                }
                tick().await;
            }
            TickDisposition::Skip { missed } => {
                warn!(label, missed, "firing past misfire grace window; skipping");
            }
        }
    }
}

/// One reconciliation sweep over every enabled provider. Each provider runs in its
/// own pass; a failure is logged and the sweep continues with the next provider.
async fn sync_sweep(inner: Arc<SchedulerInner>) {
    let providers = match provider_status::list_enabled(&inner.pool).await {
        Ok(providers) => providers,
        Err(err) => {
            error!(?err, "could not load enabled providers for sync sweep");
            return;
        }
    };
    debug!(?providers, "starting scheduled synchronization");

    for provider in providers {
        match inner.reconciler.reconcile(&provider).await {
            Ok(summary) => info!(
                provider = %provider,
                added = summary.added,
                updated = summary.updated,
                finalized = summary.finalized,
                removed = summary.removed,
                "scheduled synchronization complete"
            ),
            Err(err) => error!(?err, provider = %provider, "scheduled synchronization failed"),
        }
    }
}

async fn execution_sweep(inner: Arc<SchedulerInner>) {
    match inner.executor.execute_pending().await {
        Ok(outcome) => {
            if !outcome.executed.is_empty() || !outcome.failed.is_empty() {
                info!(
                    executed = outcome.executed.len(),
                    failed = outcome.failed.len(),
                    "execution sweep complete"
                );
            }
        }
        Err(err) => error!(?err, "execution sweep failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(value: u64) -> Duration {
        Duration::from_secs(value)
    }

    #[test]
    fn on_time_firing_runs() {
        let start = Instant::now();
        let mut cadence = Cadence::new(secs(60), secs(30), start);
        assert_eq!(
            cadence.observe(start + secs(60)),
            TickDisposition::Run { coalesced: 0 }
        );
        assert_eq!(cadence.next_due(), start + secs(120));
    }

    #[test]
    fn late_firing_within_grace_still_runs() {
        let start = Instant::now();
        let mut cadence = Cadence::new(secs(60), secs(30), start);
        assert_eq!(
            cadence.observe(start + secs(85)),
            TickDisposition::Run { coalesced: 0 }
        );
        assert_eq!(cadence.next_due(), start + secs(120));
    }

    #[test]
    fn firing_past_grace_is_skipped_not_queued() {
        let start = Instant::now();
        let mut cadence = Cadence::new(secs(60), secs(30), start);
        assert_eq!(
            cadence.observe(start + secs(100)),
            TickDisposition::Skip { missed: 1 }
        );
        // The schedule moved on; the skipped run is never replayed.
        assert_eq!(cadence.next_due(), start + secs(120));
    }

    #[test]
    fn multiple_missed_firings_coalesce_into_one_run() {
        let start = Instant::now();
        let mut cadence = Cadence::new(secs(60), secs(30), start);
        // Wakes up 190s in: dues at 60, 120 and 180 have passed; the 180s due
        // is only 10s late, so one catch-up run covers all three.
        assert_eq!(
            cadence.observe(start + secs(190)),
            TickDisposition::Run { coalesced: 2 }
        );
        assert_eq!(cadence.next_due(), start + secs(240));
    }

    #[test]
    fn long_stall_past_grace_skips_everything() {
        let start = Instant::now();
        let mut cadence = Cadence::new(secs(60), secs(30), start);
        assert_eq!(
            cadence.observe(start + secs(299)),
            TickDisposition::Skip { missed: 4 }
        );
        assert_eq!(cadence.next_due(), start + secs(300));
    }
}
