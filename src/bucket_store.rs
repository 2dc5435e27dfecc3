// Minute/hour time buckets over the cache.
// Minute buckets are overwritten wholesale each cycle; hour buckets are
// folded read-modify-write (online mean + peak) under the pipeline's cycle
// lock, so the fold never races another writer.

use crate::cache::{MetricsCache, get_json, put_json};
use crate::models::ProcessedSnapshot;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const MS_PER_MINUTE: u64 = 60_000;
pub const MS_PER_HOUR: u64 = 3_600_000;

/// Latest snapshot-derived tuple for one minute.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinuteBucket {
    pub captured_at: u64,
    pub gauges: BTreeMap<String, f64>,
    pub deltas: BTreeMap<String, f64>,
}

/// Running aggregate of one metric within an hour bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourAggregate {
    pub avg: f64,
    pub count: u64,
    pub peak: f64,
}

impl HourAggregate {
    /// Online mean update: `new_avg = (old_avg * n + x) / (n + 1)`.
    pub fn fold(&mut self, x: f64) {
        self.avg = (self.avg * self.count as f64 + x) / (self.count as f64 + 1.0);
        self.count += 1;
        self.peak = self.peak.max(x);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourBucket {
    pub gauges: BTreeMap<String, HourAggregate>,
    /// Per-counter delta totals accumulated within the hour.
    pub delta_sums: BTreeMap<String, f64>,
    pub last_updated: u64,
}

pub fn minute_key(ts_ms: u64) -> String {
    format_key(ts_ms, "%Y-%m-%d-%H-%M")
}

pub fn hour_key(ts_ms: u64) -> String {
    format_key(ts_ms, "%Y-%m-%d-%H")
}

pub fn day_key(ts_ms: u64) -> String {
    format_key(ts_ms, "%Y-%m-%d")
}

fn format_key(ts_ms: u64, fmt: &str) -> String {
    match Utc.timestamp_millis_opt(ts_ms as i64).single() {
        Some(dt) => dt.format(fmt).to_string(),
        None => String::from("invalid"),
    }
}

pub struct BucketStore {
    cache: Arc<dyn MetricsCache>,
    minute_ttl: Duration,
    hour_ttl: Duration,
}

impl BucketStore {
    pub fn new(cache: Arc<dyn MetricsCache>, minute_ttl: Duration, hour_ttl: Duration) -> Self {
        Self {
            cache,
            minute_ttl,
            hour_ttl,
        }
    }

    /// Fold one processed snapshot into its minute and hour buckets.
    pub fn record(&self, snapshot: &ProcessedSnapshot) {
        let deltas: BTreeMap<String, f64> = snapshot
            .counters
            .iter()
            .map(|(k, v)| (k.clone(), v.delta))
            .collect();

        let minute = MinuteBucket {
            captured_at: snapshot.captured_at,
            gauges: snapshot.gauges.clone(),
            deltas: deltas.clone(),
        };
        put_json(
            self.cache.as_ref(),
            &format!("metrics:minute:{}", minute_key(snapshot.captured_at)),
            &minute,
            Some(self.minute_ttl),
        );

        let hour_cache_key = format!("metrics:hour:{}", hour_key(snapshot.captured_at));
        let mut hour: HourBucket =
            get_json(self.cache.as_ref(), &hour_cache_key).unwrap_or_default();
        for (name, value) in &snapshot.gauges {
            hour.gauges.entry(name.clone()).or_default().fold(*value);
        }
        for (name, delta) in &deltas {
            *hour.delta_sums.entry(name.clone()).or_default() += delta;
        }
        hour.last_updated = snapshot.captured_at;
        put_json(self.cache.as_ref(), &hour_cache_key, &hour, Some(self.hour_ttl));
    }

    /// Minute buckets for the last `window` minutes ending at `now_ms`,
    /// oldest first. Missing minutes (no scrape landed) are omitted.
    pub fn minute_window(&self, now_ms: u64, window: usize) -> Vec<(String, MinuteBucket)> {
        self.window(now_ms, window, MS_PER_MINUTE, "metrics:minute:", minute_key)
    }

    /// Hour buckets for the last `window` hours ending at `now_ms`, oldest
    /// first.
    pub fn hour_window(&self, now_ms: u64, window: usize) -> Vec<(String, HourBucket)> {
        self.window(now_ms, window, MS_PER_HOUR, "metrics:hour:", hour_key)
    }

    fn window<T: serde::de::DeserializeOwned>(
        &self,
        now_ms: u64,
        window: usize,
        step_ms: u64,
        prefix: &str,
        key_fn: fn(u64) -> String,
    ) -> Vec<(String, T)> {
        let mut out = Vec::new();
        for i in (0..window as u64).rev() {
            let Some(ts) = now_ms.checked_sub(i * step_ms) else {
                continue;
            };
            let key = key_fn(ts);
            if let Some(bucket) = get_json(self.cache.as_ref(), &format!("{prefix}{key}")) {
                out.push((key, bucket));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::models::CounterValue;

    fn snapshot(captured_at: u64, connected: f64, delta: f64) -> ProcessedSnapshot {
        let mut gauges = BTreeMap::new();
        gauges.insert("soketi_connected".to_string(), connected);
        let mut counters = BTreeMap::new();
        counters.insert(
            "soketi_new_connections_total".to_string(),
            CounterValue {
                total: 0.0,
                delta,
            },
        );
        ProcessedSnapshot {
            captured_at,
            gauges,
            counters,
            usage: None,
            resets_detected: 0,
        }
    }

    fn store(cache: Arc<dyn MetricsCache>) -> BucketStore {
        BucketStore::new(cache, Duration::from_secs(7200), Duration::from_secs(86400))
    }

    // 2024-07-01T10:15:30Z
    const TS: u64 = 1_719_828_930_000;

    #[test]
    fn key_formats() {
        assert_eq!(minute_key(TS), "2024-07-01-10-15");
        assert_eq!(hour_key(TS), "2024-07-01-10");
    }

    #[test]
    fn minute_bucket_is_overwritten_wholesale() {
        let cache = Arc::new(MemoryCache::new());
        let s = store(cache.clone());
        s.record(&snapshot(TS, 10.0, 5.0));
        s.record(&snapshot(TS + 1_000, 20.0, 7.0));
        let buckets = s.minute_window(TS + 1_000, 1);
        assert_eq!(buckets.len(), 1);
        let (_, bucket) = &buckets[0];
        assert_eq!(bucket.gauges["soketi_connected"], 20.0);
        assert_eq!(bucket.captured_at, TS + 1_000);
    }

    #[test]
    fn hour_bucket_folds_avg_count_peak() {
        let cache = Arc::new(MemoryCache::new());
        let s = store(cache.clone());
        for (i, v) in [10.0, 30.0, 20.0].iter().enumerate() {
            s.record(&snapshot(TS + i as u64 * 1_000, *v, 1.0));
        }
        let buckets = s.hour_window(TS, 1);
        assert_eq!(buckets.len(), 1);
        let agg = buckets[0].1.gauges["soketi_connected"];
        assert_eq!(agg.count, 3);
        assert!((agg.avg - 20.0).abs() < 1e-9);
        assert_eq!(agg.peak, 30.0);
        assert_eq!(buckets[0].1.delta_sums["soketi_new_connections_total"], 3.0);
    }

    #[test]
    fn hour_peak_dominates_every_folded_sample() {
        let mut agg = HourAggregate::default();
        let values = [5.0, 80.0, 2.0, 43.0];
        for v in values {
            agg.fold(v);
        }
        for v in values {
            assert!(agg.peak >= v);
        }
        assert_eq!(agg.count as usize, values.len());
    }

    #[test]
    fn windows_span_bucket_boundaries() {
        let cache = Arc::new(MemoryCache::new());
        let s = store(cache.clone());
        s.record(&snapshot(TS, 1.0, 0.0));
        s.record(&snapshot(TS + MS_PER_MINUTE, 2.0, 0.0));
        s.record(&snapshot(TS + MS_PER_HOUR, 3.0, 0.0));

        let minutes = s.minute_window(TS + MS_PER_MINUTE, 5);
        assert_eq!(minutes.len(), 2);
        assert_eq!(minutes[0].0, "2024-07-01-10-15");
        assert_eq!(minutes[1].0, "2024-07-01-10-16");

        let hours = s.hour_window(TS + MS_PER_HOUR, 2);
        assert_eq!(hours.len(), 2);
        assert_eq!(hours[0].0, "2024-07-01-10");
        assert_eq!(hours[1].0, "2024-07-01-11");
    }
}
