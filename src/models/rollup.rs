// Durable hourly rollup row

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One `upload_metrics_hourly` row, unique on `hour` (`YYYY-MM-DD-HH`).
/// Written only by the hourly aggregator via upsert; read-only elsewhere.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HourlyRollup {
    pub hour: String,
    pub total_uploads: i64,
    pub completed_uploads: i64,
    pub failed_uploads: i64,
    pub total_bytes: i64,
    pub avg_duration: f64,
    pub avg_speed: f64,
    pub completion_rate: f64,
    pub duration_histogram: BTreeMap<String, i64>,
    pub size_histogram: BTreeMap<String, i64>,
    pub error_stages: BTreeMap<String, i64>,
}
