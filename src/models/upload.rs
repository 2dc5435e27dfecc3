// Upload lifecycle: ingestion payloads, durable row, real-time summary

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `prepared` event payload. Field names are a contract with the ingestion
/// collaborator; everything optional is validated in the repo layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedEvent {
    pub upload_id: Option<String>,
    pub user_id: Option<i64>,
    #[serde(default)]
    pub metadata: PreparedMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedMetadata {
    pub file_size: Option<i64>,
    pub file_name: Option<String>,
    pub chunk_count: Option<i64>,
    pub chunk_size: Option<i64>,
    pub estimated_duration: Option<f64>,
}

/// `completed` event payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedEvent {
    pub upload_id: Option<String>,
    pub user_id: Option<i64>,
    pub video_id: Option<i64>,
    #[serde(default)]
    pub metadata: CompletedMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedMetadata {
    pub final_file_size: Option<i64>,
    pub processing_time: Option<f64>,
    pub upload_duration: Option<f64>,
}

/// `failed` event payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedEvent {
    pub upload_id: Option<String>,
    pub user_id: Option<i64>,
    #[serde(default)]
    pub failure_data: FailureData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureData {
    pub message: Option<String>,
    pub code: Option<String>,
    pub stage: Option<String>,
    pub retryable: Option<bool>,
    pub percentage_completed: Option<f64>,
    pub chunks_completed: Option<i64>,
    pub bytes_uploaded: Option<i64>,
    pub attempt_number: Option<i64>,
}

/// One durable `upload_metrics` row. Timestamps are epoch milliseconds;
/// durations are seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEventRow {
    pub upload_id: String,
    pub user_id: Option<i64>,
    pub video_id: Option<i64>,
    pub event_type: String,
    pub status: String,
    pub file_size: Option<i64>,
    pub file_name: Option<String>,
    pub chunk_count: Option<i64>,
    pub chunk_size: Option<i64>,
    pub chunks_completed: Option<i64>,
    pub percentage_completed: Option<f64>,
    pub bytes_uploaded: Option<i64>,
    pub prepared_at: Option<i64>,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub failed_at: Option<i64>,
    pub upload_duration: Option<f64>,
    pub processing_time: Option<f64>,
    pub estimated_duration: Option<f64>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub error_stage: Option<String>,
    pub retryable: Option<bool>,
    pub attempt_number: Option<i64>,
    pub upload_speed: Option<f64>,
    pub connection_quality: Option<String>,
    pub created_at: i64,
}

/// Real-time upload counters read back from the cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub prepared: u64,
    pub completed: u64,
    pub failed: u64,
    /// `max(0, prepared - completed - failed)`; never negative.
    pub active_uploads: u64,
    /// `completed / prepared * 100`, zero when nothing was prepared.
    pub completion_rate: f64,
    pub avg_duration_secs: f64,
    pub duration_buckets: BTreeMap<String, u64>,
}
