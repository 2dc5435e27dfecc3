// Processed scrape-cycle snapshots and the versioned previous-counter slot

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Running total plus the non-negative increase since the previous cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterValue {
    pub total: f64,
    pub delta: f64,
}

/// One scrape cycle's processed output: gauges pass through unchanged,
/// counters carry their delta. `usage` is the optional upstream JSON payload
/// merged verbatim when the usage endpoint responds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedSnapshot {
    pub captured_at: u64,
    pub gauges: BTreeMap<String, f64>,
    pub counters: BTreeMap<String, CounterValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<serde_json::Value>,
    /// Counters observed below their previous total this cycle (upstream
    /// restart). The delta is clamped to zero; this count makes the reset
    /// visible instead of silent.
    pub resets_detected: u32,
}

/// Previous raw counter totals, versioned by generation. Stored in the cache
/// and replaced with compare-and-swap so an overlapping stale cycle is
/// rejected rather than double-counted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviousCounters {
    pub generation: u64,
    pub captured_at: u64,
    pub totals: BTreeMap<String, f64>,
}
