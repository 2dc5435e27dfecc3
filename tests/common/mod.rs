// Shared test helpers

use soketi_metrics::cache::{MemoryCache, MetricsCache};
use soketi_metrics::models::*;
use soketi_metrics::upload_repo::UploadRepo;
use std::sync::Arc;
use tempfile::TempDir;

/// Upload repo over a temp SQLite file plus its backing cache. The TempDir
/// must stay alive for the duration of the test.
pub async fn test_repo() -> (UploadRepo, Arc<MemoryCache>, TempDir) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("uploads.db");
    let cache = Arc::new(MemoryCache::new());
    let cache_dyn: Arc<dyn MetricsCache> = cache.clone();
    let repo = UploadRepo::connect(path.to_str().unwrap(), 2, 30, cache_dyn)
        .await
        .unwrap();
    repo.init().await.unwrap();
    (repo, cache, dir)
}

pub fn prepared_event(upload_id: &str, user_id: i64, file_size: i64) -> PreparedEvent {
    PreparedEvent {
        upload_id: Some(upload_id.to_string()),
        user_id: Some(user_id),
        metadata: PreparedMetadata {
            file_size: Some(file_size),
            file_name: Some("video.mp4".to_string()),
            chunk_count: Some(4),
            chunk_size: Some(file_size / 4),
            estimated_duration: Some(30.0),
        },
    }
}

pub fn completed_event(upload_id: &str, video_id: i64) -> CompletedEvent {
    CompletedEvent {
        upload_id: Some(upload_id.to_string()),
        user_id: Some(7),
        video_id: Some(video_id),
        metadata: CompletedMetadata::default(),
    }
}

pub fn failed_event(upload_id: &str, stage: &str) -> FailedEvent {
    FailedEvent {
        upload_id: Some(upload_id.to_string()),
        user_id: Some(7),
        failure_data: FailureData {
            message: Some("chunk upload timed out".to_string()),
            code: Some("E_TIMEOUT".to_string()),
            stage: Some(stage.to_string()),
            retryable: Some(true),
            percentage_completed: Some(62.5),
            chunks_completed: Some(5),
            bytes_uploaded: Some(640_000),
            attempt_number: None,
        },
    }
}
