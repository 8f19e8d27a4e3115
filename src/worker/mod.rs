//! Lifecycle worker
//!
//! Background jobs that run regardless of client traffic: the inactivity
//! and orphan sweep, the durable snapshot, the reverse sync from the
//! durable store, and a daily integrity pass. Every job is idempotent;
//! transient failures retry with exponential backoff and persistent
//! failures are logged and swallowed so the worker keeps its schedule.

pub mod snapshot;
pub mod sweeper;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::server::ServerConfig;
use crate::store::StateStore;

pub use snapshot::SnapshotStore;
pub use sweeper::Sweeper;

/// Backoff base for failed jobs.
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Attempts per job run, backoff doubling in between.
const RETRY_ATTEMPTS: u32 = 3;

/// Hour (UTC) of the daily integrity pass.
const INTEGRITY_HOUR: u32 = 3;

/// Scheduler for the background jobs
pub struct LifecycleWorker {
    config: ServerConfig,
    store: Arc<dyn StateStore>,
    sweeper: Arc<Sweeper>,
    snapshot: Option<Arc<SnapshotStore>>,
}

impl LifecycleWorker {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn StateStore>,
        sweeper: Arc<Sweeper>,
        snapshot: Option<Arc<SnapshotStore>>,
    ) -> Self {
        Self {
            config,
            store,
            sweeper,
            snapshot,
        }
    }

    /// Spawn every scheduled job. The handles outlive the call; abort them
    /// on shutdown.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let worker = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            let mut ticker = interval_after(worker.config.sweep_interval);
            loop {
                ticker.tick().await;
                let sweeper = Arc::clone(&worker.sweeper);
                run_with_backoff("sweep", || {
                    let sweeper = Arc::clone(&sweeper);
                    async move { sweeper.sweep().await }
                })
                .await;
            }
        }));

        if let Some(snapshot) = &self.snapshot {
            let sync_snapshot = Arc::clone(snapshot);
            let worker = Arc::clone(self);
            let snapshot = Arc::clone(snapshot);
            handles.push(tokio::spawn(async move {
                let mut ticker = interval_after(worker.config.snapshot_interval);
                loop {
                    ticker.tick().await;
                    let snapshot = Arc::clone(&snapshot);
                    let store = Arc::clone(&worker.store);
                    run_with_backoff("snapshot", || {
                        let snapshot = Arc::clone(&snapshot);
                        let store = Arc::clone(&store);
                        async move { snapshot.snapshot(store.as_ref()).await }
                    })
                    .await;
                }
            }));

            let worker = Arc::clone(self);
            let snapshot = sync_snapshot;
            handles.push(tokio::spawn(async move {
                let mut ticker = interval_after(worker.config.sync_interval);
                loop {
                    ticker.tick().await;
                    let snapshot = Arc::clone(&snapshot);
                    let store = Arc::clone(&worker.store);
                    run_with_backoff("reverse-sync", || {
                        let snapshot = Arc::clone(&snapshot);
                        let store = Arc::clone(&store);
                        async move { snapshot.restore(store.as_ref()).await }
                    })
                    .await;
                }
            }));
        }

        let worker = Arc::clone(self);
        handles.push(tokio::spawn(async move {
            loop {
                tokio::time::sleep(until_next_daily(INTEGRITY_HOUR)).await;
                let sweeper = Arc::clone(&worker.sweeper);
                run_with_backoff("integrity", || {
                    let sweeper = Arc::clone(&sweeper);
                    async move { sweeper.integrity_pass().await }
                })
                .await;
            }
        }));

        tracing::info!(
            snapshotting = self.snapshot.is_some(),
            "Lifecycle worker started"
        );
        handles
    }
}

/// Interval whose first tick fires after one full period, not immediately.
fn interval_after(period: Duration) -> tokio::time::Interval {
    tokio::time::interval_at(tokio::time::Instant::now() + period, period)
}

/// Run one job with bounded retries. Gives up quietly after the last
/// attempt; the next scheduled run starts fresh.
async fn run_with_backoff<F, Fut>(job: &str, mut attempt: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<()>>,
{
    let mut delay = RETRY_BASE_DELAY;
    for n in 1..=RETRY_ATTEMPTS {
        match attempt().await {
            Ok(()) => return,
            Err(e) if n < RETRY_ATTEMPTS => {
                tracing::warn!(job, attempt = n, error = %e, "Job failed, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                tracing::error!(job, error = %e, "Job failed, giving up until next tick");
            }
        }
    }
}

/// Time until the next daily run at `hour`:00 UTC.
fn until_next_daily(hour: u32) -> Duration {
    let fallback = Duration::from_secs(24 * 60 * 60);
    let now = chrono::Utc::now();
    let Some(today_at) = now.date_naive().and_hms_opt(hour, 0, 0) else {
        return fallback;
    };
    let mut target = today_at.and_utc();
    if target <= now {
        target += chrono::Duration::days(1);
    }
    (target - now).to_std().unwrap_or(fallback)
}
