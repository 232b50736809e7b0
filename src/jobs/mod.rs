//! Periodic background jobs: one crawler per connector, the deleter and the
//! stale notifier.
//!
//! Every job runs on the same scheduler: first run at startup, then one run
//! per interval. A run is awaited before the next tick is taken, so runs of
//! one job never overlap, and a slow run delays the schedule instead of
//! queueing extra ticks. Shutdown is observed only between runs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::metrics::Metrics;

pub mod crawler;
pub mod deleter;
pub mod stale;

/// Upper bound for a single run of any job.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(120);

#[async_trait]
pub trait Job: Send + Sync {
    /// Label used in logs and the `job` metric label.
    fn name(&self) -> &str;

    async fn run_once(&self) -> anyhow::Result<()>;
}

/// Spawn `job` on its own task, running every `every` until `shutdown`
/// flips to true (or its sender is dropped).
pub fn spawn(
    job: Arc<dyn Job>,
    every: Duration,
    metrics: Metrics,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_periodically(job, every, RUN_TIMEOUT, metrics, shutdown))
}

pub async fn run_periodically(
    job: Arc<dyn Job>,
    every: Duration,
    run_timeout: Duration,
    metrics: Metrics,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(job = job.name(), interval = ?every, "job started");

    let mut ticker = time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                run_bounded(job.as_ref(), run_timeout, &metrics).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(job = job.name(), "job shut down");
}

async fn run_bounded(job: &dyn Job, run_timeout: Duration, metrics: &Metrics) {
    let result = match time::timeout(run_timeout, job.run_once()).await {
        Ok(Ok(())) => "ok",
        Ok(Err(e)) => {
            error!(job = job.name(), error = %format!("{e:#}"), "job run failed");
            "error"
        }
        Err(_) => {
            warn!(job = job.name(), timeout = ?run_timeout, "job run timed out");
            "timeout"
        }
    };
    metrics.job_run(job.name(), result);
}
