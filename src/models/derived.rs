// Derived metrics: rates, ratios, trend and intensity labels

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{ProcessedSnapshot, UploadSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    #[default]
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intensity {
    #[default]
    Low,
    Medium,
    High,
}

/// Trend classification for one gauge across two consecutive snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GaugeTrend {
    pub current: f64,
    pub previous: f64,
    pub trend: Trend,
    pub peak: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedMetrics {
    pub connections_per_min: f64,
    pub received_bytes_per_sec: f64,
    pub transmitted_bytes_per_sec: f64,
    /// Received share of total byte traffic, in percent.
    pub received_ratio_percent: f64,
    pub intensity: Intensity,
    pub trends: BTreeMap<String, GaugeTrend>,
}

/// Read-optimized merge of the latest cycle, its derived metrics, and the
/// real-time upload counters. This is what the dashboard consumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub snapshot: ProcessedSnapshot,
    pub derived: DerivedMetrics,
    pub uploads: UploadSummary,
}
