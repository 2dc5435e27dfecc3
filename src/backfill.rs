// One-time backfill: re-aggregate recent closed hours at startup so rollups
// missed during downtime are recovered. Idempotent per hour (upsert).

use crate::upload_repo::{UploadRepo, now_ms};
use std::sync::Arc;
use tracing::info;

pub async fn run_backfill(repo: Arc<UploadRepo>, backfill_hours: u32) -> anyhow::Result<()> {
    let now = now_ms();
    let latest_closed = crate::rollup_worker::previous_hour_start(now);
    for i in (0..backfill_hours as i64).rev() {
        let hour_start = latest_closed - i * 3_600_000;
        repo.aggregate_hour(hour_start).await?;
    }
    info!(backfill_hours, "rollup backfill complete");
    Ok(())
}
