// Background worker: roll the previous closed hour of upload events into
// one durable summary row, then prune events past retention.
// Fires on a cron schedule (local time) or a fixed interval fallback.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RollupConfig;
use crate::upload_repo::{UploadRepo, now_ms};
use tracing::{info, instrument, warn};

const MS_PER_HOUR: i64 = 3_600_000;

/// Spawns the rollup worker. Returns a join handle.
pub fn spawn(repo: Arc<UploadRepo>, config: RollupConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(repo, config).await;
    })
}

#[instrument(skip(repo, config))]
async fn run(repo: Arc<UploadRepo>, config: RollupConfig) {
    let (tick_tx, mut tick_rx) = tokio::sync::mpsc::channel::<()>(1);
    tokio::spawn(rollup_scheduler(config, tick_tx));

    while tick_rx.recv().await.is_some() {
        if let Err(e) = run_one_tick(&repo, now_ms()).await {
            warn!(error = %e, "rollup tick failed");
        }
    }
}

/// Sends a message on `tx` at each rollup time (cron or fixed interval).
/// Uses local time for cron.
async fn rollup_scheduler(config: RollupConfig, tx: tokio::sync::mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid rollup schedule; hourly rollups will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            let next = schedule.after(&now).next();
            if let Some(next) = next {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let interval = Duration::from_secs(config.interval_secs);
        loop {
            tokio::time::sleep(interval).await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}

/// Start of the closed hour immediately preceding `now_ms` (never the hour
/// still in progress).
pub fn previous_hour_start(now_ms: i64) -> i64 {
    (now_ms / MS_PER_HOUR) * MS_PER_HOUR - MS_PER_HOUR
}

/// Runs one rollup pass: aggregate the previous closed hour, then prune
/// events past retention. Used by the worker loop and by backfill.
pub async fn run_one_tick(repo: &UploadRepo, now_ms: i64) -> anyhow::Result<()> {
    let hour_start = previous_hour_start(now_ms);
    let summary = repo.aggregate_hour(hour_start).await?;
    info!(
        hour = %summary.hour,
        total_uploads = summary.total_uploads,
        completed = summary.completed_uploads,
        failed = summary.failed_uploads,
        "hourly rollup written"
    );

    let pruned = repo.prune_old_events().await?;
    if pruned > 0 {
        info!(pruned, "old upload events pruned");
    }
    Ok(())
}
