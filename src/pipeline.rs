// One scrape cycle: fetch -> parse -> delta -> buckets -> derived -> publish.
// The whole sequence runs under a single-flight lock; an overlapping trigger
// skips its cycle instead of racing the previous-counter slot and the
// hour-bucket fold.

use crate::bucket_store::BucketStore;
use crate::cache::{MetricsCache, get_json, put_json};
use crate::config::DerivedConfig;
use crate::delta::CounterDeltaTracker;
use crate::derived;
use crate::models::{DashboardStats, ProcessedSnapshot};
use crate::scrape::ScrapeClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub const CURRENT_SNAPSHOT_KEY: &str = "metrics:current";
pub const DASHBOARD_STATS_KEY: &str = "metrics:dashboard";

/// Retained long enough to survive a few missed cycles, short enough that a
/// dead pipeline stops serving stale "current" data.
const CURRENT_TTL: Duration = Duration::from_secs(3_600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Cycle completed; carries the number of samples processed.
    Completed { samples: usize },
    /// Another cycle still held the single-flight lock.
    Skipped,
}

pub struct Pipeline {
    scrape: ScrapeClient,
    tracker: CounterDeltaTracker,
    buckets: Arc<BucketStore>,
    cache: Arc<dyn MetricsCache>,
    derived_cfg: DerivedConfig,
    interval_secs: u64,
    stats_tx: broadcast::Sender<DashboardStats>,
    cycle_lock: tokio::sync::Mutex<()>,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scrape: ScrapeClient,
        tracker: CounterDeltaTracker,
        buckets: Arc<BucketStore>,
        cache: Arc<dyn MetricsCache>,
        derived_cfg: DerivedConfig,
        interval_secs: u64,
        stats_tx: broadcast::Sender<DashboardStats>,
    ) -> Self {
        Self {
            scrape,
            tracker,
            buckets,
            cache,
            derived_cfg,
            interval_secs,
            stats_tx,
            cycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run one cycle. Any fetch failure or a stale previous-counter slot
    /// aborts before the first bucket write, so no partial snapshot is ever
    /// visible.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleOutcome> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            tracing::warn!("scrape cycle still running, skipping this trigger");
            return Ok(CycleOutcome::Skipped);
        };

        let payload = self.scrape.fetch_metrics().await?;
        let samples = crate::exposition::parse_payload(&payload);

        let usage = match self.scrape.fetch_usage().await {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::debug!(error = %e, "usage fetch failed (non-fatal)");
                None
            }
        };

        let captured_at = crate::upload_repo::now_ms() as u64;
        let snapshot = self.tracker.process(&samples, usage, captured_at)?;

        let previous: Option<ProcessedSnapshot> =
            get_json(self.cache.as_ref(), CURRENT_SNAPSHOT_KEY);

        self.buckets.record(&snapshot);

        let derived = derived::analyze(
            &snapshot,
            previous.as_ref(),
            &self.derived_cfg,
            self.interval_secs,
        );
        let uploads = crate::upload_repo::realtime_summary(self.cache.as_ref());

        put_json(
            self.cache.as_ref(),
            CURRENT_SNAPSHOT_KEY,
            &snapshot,
            Some(CURRENT_TTL),
        );

        let sample_count = samples.len();
        let stats = DashboardStats {
            snapshot,
            derived,
            uploads,
        };
        put_json(
            self.cache.as_ref(),
            DASHBOARD_STATS_KEY,
            &stats,
            Some(CURRENT_TTL),
        );

        // No receivers just means no dashboard is watching right now.
        let _ = self.stats_tx.send(stats);

        Ok(CycleOutcome::Completed {
            samples: sample_count,
        })
    }
}

/// Latest merged stats as served to the dashboard, if a cycle has run
/// recently.
pub fn dashboard_stats(cache: &dyn MetricsCache) -> Option<DashboardStats> {
    get_json(cache, DASHBOARD_STATS_KEY)
}
