// Rates, ratios, and qualitative labels from two consecutive snapshots.
// Pure functions; every threshold comes from config, none is inferred.

use crate::config::DerivedConfig;
use crate::models::{DerivedMetrics, GaugeTrend, Intensity, ProcessedSnapshot, Trend};
use std::collections::BTreeMap;

/// Compute derived metrics for `current`. `previous` absent (cold start)
/// yields zero rates and all-stable trends. `interval_secs` is the nominal
/// configured cycle interval, not a measured elapsed time.
pub fn analyze(
    current: &ProcessedSnapshot,
    previous: Option<&ProcessedSnapshot>,
    cfg: &DerivedConfig,
    interval_secs: u64,
) -> DerivedMetrics {
    let interval = interval_secs.max(1) as f64;

    let connections_delta = delta_sum(current, &cfg.connections_counter);
    let received_delta = delta_sum(current, &cfg.received_bytes_counter);
    let transmitted_delta = delta_sum(current, &cfg.transmitted_bytes_counter);

    let received_bytes_per_sec = received_delta / interval;
    let transmitted_bytes_per_sec = transmitted_delta / interval;
    let total_rate = received_bytes_per_sec + transmitted_bytes_per_sec;

    DerivedMetrics {
        connections_per_min: connections_delta / interval * 60.0,
        received_bytes_per_sec,
        transmitted_bytes_per_sec,
        received_ratio_percent: received_delta / (received_delta + transmitted_delta).max(1.0)
            * 100.0,
        intensity: classify_intensity(total_rate, cfg),
        trends: classify_trends(current, previous, cfg),
    }
}

/// Sum of counter deltas sharing a base metric name (labeled series of one
/// counter are folded together).
fn delta_sum(snapshot: &ProcessedSnapshot, base: &str) -> f64 {
    snapshot
        .counters
        .iter()
        .filter(|(key, _)| base_name(key) == base)
        .map(|(_, v)| v.delta)
        .sum()
}

fn base_name(key: &str) -> &str {
    key.split('{').next().unwrap_or(key)
}

fn classify_intensity(bytes_per_sec: f64, cfg: &DerivedConfig) -> Intensity {
    if bytes_per_sec < cfg.bytes_rate_medium {
        Intensity::Low
    } else if bytes_per_sec < cfg.bytes_rate_high {
        Intensity::Medium
    } else {
        Intensity::High
    }
}

fn classify_trends(
    current: &ProcessedSnapshot,
    previous: Option<&ProcessedSnapshot>,
    cfg: &DerivedConfig,
) -> BTreeMap<String, GaugeTrend> {
    let mut trends = BTreeMap::new();
    for (name, &value) in &current.gauges {
        let prev = previous.and_then(|p| p.gauges.get(name).copied());
        let trend = match prev {
            None => Trend::Stable,
            Some(p) if value > p * cfg.increase_factor => Trend::Increasing,
            Some(p) if value < p * cfg.decrease_factor => Trend::Decreasing,
            Some(_) => Trend::Stable,
        };
        trends.insert(
            name.clone(),
            GaugeTrend {
                current: value,
                previous: prev.unwrap_or(0.0),
                trend,
                peak: value > cfg.peak_threshold,
            },
        );
    }
    trends
}
