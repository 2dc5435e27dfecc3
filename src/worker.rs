// Background scrape worker: the periodic trigger for the pipeline.
// Cycles run on a fixed cadence; stats logging and cache purging use
// real-time intervals independent of the scrape cadence.

use crate::cache::MemoryCache;
use crate::pipeline::{CycleOutcome, Pipeline};
use std::sync::Arc;
use tokio::time::{Duration, interval};

/// Pipeline, cache handle, and shutdown for the worker.
pub struct WorkerDeps {
    pub pipeline: Arc<Pipeline>,
    pub cache: Arc<MemoryCache>,
    pub shutdown_rx: tokio::sync::oneshot::Receiver<()>,
}

/// Worker timing and logging config.
pub struct WorkerConfig {
    pub scrape_interval_secs: u64,
    /// How often to log app stats (real seconds).
    pub stats_log_interval_secs: u64,
    /// How often to drop expired cache entries (real seconds).
    pub purge_interval_secs: u64,
}

pub fn spawn(deps: WorkerDeps, config: WorkerConfig) -> tokio::task::JoinHandle<()> {
    let WorkerDeps {
        pipeline,
        cache,
        mut shutdown_rx,
    } = deps;
    let WorkerConfig {
        scrape_interval_secs,
        stats_log_interval_secs,
        purge_interval_secs,
    } = config;

    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(scrape_interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stats_log_tick = interval(Duration::from_secs(stats_log_interval_secs));
        stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut purge_tick = interval(Duration::from_secs(purge_interval_secs));
        purge_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut cycles_completed: u64 = 0;
        let mut cycles_skipped: u64 = 0;
        let mut cycles_failed: u64 = 0;
        let mut samples_last_cycle: usize = 0;

        let worker_span = tracing::span!(tracing::Level::DEBUG, "worker", scrape_interval_secs);
        let _guard = worker_span.enter();

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match pipeline.run_cycle().await {
                        Ok(CycleOutcome::Completed { samples }) => {
                            cycles_completed += 1;
                            samples_last_cycle = samples;
                        }
                        Ok(CycleOutcome::Skipped) => {
                            cycles_skipped += 1;
                        }
                        Err(e) => {
                            cycles_failed += 1;
                            tracing::warn!(
                                error = %e,
                                operation = "run_cycle",
                                "scrape cycle failed; retrying on next tick"
                            );
                        }
                    }
                }
                _ = &mut shutdown_rx => {
                    tracing::debug!("Worker shutting down");
                    break;
                }
                _ = stats_log_tick.tick() => {
                    tracing::info!(
                        cycles_completed,
                        cycles_skipped,
                        cycles_failed,
                        samples_last_cycle,
                        cache_entries = cache.len(),
                        "app stats"
                    );
                }
                _ = purge_tick.tick() => {
                    let purged = cache.purge_expired();
                    if purged > 0 {
                        tracing::debug!(purged, operation = "purge_expired", "expired cache entries dropped");
                    }
                }
            }
        }
    })
}
