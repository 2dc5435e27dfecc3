// Hourly aggregator tests: per-hour rollup contents, idempotence, day-range reads

mod common;

use common::{completed_event, failed_event, prepared_event, test_repo};
use soketi_metrics::models::CompletedMetadata;

// 2024-07-01T10:00:00Z
const HOUR_START: i64 = 1_719_828_000_000;

#[tokio::test]
async fn aggregate_hour_counts_and_histograms() {
    let (repo, _cache, _dir) = test_repo().await;

    // Completed upload inside the hour: 20 MB in 45 s
    repo.record_prepared_at(
        &prepared_event("c1", 7, 20 * 1024 * 1024),
        HOUR_START + 60_000,
    )
    .await
    .unwrap();
    repo.record_completed_at(&completed_event("c1", 1), HOUR_START + 105_000)
        .await
        .unwrap();

    // Failed upload inside the hour
    repo.record_prepared_at(&prepared_event("f1", 8, 1_000_000), HOUR_START + 120_000)
        .await
        .unwrap();
    repo.record_failed_at(&failed_event("f1", "chunk-upload"), HOUR_START + 130_000)
        .await
        .unwrap();

    // Still-pending upload inside the hour
    repo.record_prepared_at(&prepared_event("p1", 9, 500), HOUR_START + 300_000)
        .await
        .unwrap();

    // Upload in the next hour must not count
    repo.record_prepared_at(&prepared_event("next", 10, 500), HOUR_START + 3_700_000)
        .await
        .unwrap();

    let rollup = repo.aggregate_hour(HOUR_START).await.unwrap();
    assert_eq!(rollup.hour, "2024-07-01-10");
    assert_eq!(rollup.total_uploads, 3);
    assert_eq!(rollup.completed_uploads, 1);
    assert_eq!(rollup.failed_uploads, 1);
    // 20 MB completed + 640000 bytes uploaded before the failure
    assert_eq!(rollup.total_bytes, 20 * 1024 * 1024 + 640_000);
    assert!((rollup.avg_duration - 45.0).abs() < 1e-9);
    assert!((rollup.completion_rate - 100.0 / 3.0).abs() < 1e-9);
    assert_eq!(rollup.duration_histogram.get("30-60s"), Some(&1));
    assert_eq!(rollup.size_histogram.get("10-50MB"), Some(&1));
    assert_eq!(rollup.error_stages.get("chunk-upload"), Some(&1));
}

#[tokio::test]
async fn aggregate_hour_is_idempotent() {
    let (repo, _cache, _dir) = test_repo().await;

    repo.record_prepared_at(&prepared_event("u1", 7, 1_000), HOUR_START + 1_000)
        .await
        .unwrap();
    repo.record_completed_at(&completed_event("u1", 1), HOUR_START + 13_000)
        .await
        .unwrap();

    let first = repo.aggregate_hour(HOUR_START).await.unwrap();
    let second = repo.aggregate_hour(HOUR_START).await.unwrap();
    assert_eq!(first, second);

    let rows = repo
        .rollups_for_day_range("2024-07-01", "2024-07-01")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1, "re-running must overwrite, not duplicate");
    assert_eq!(rows[0], first);
}

#[tokio::test]
async fn rerun_after_new_events_overwrites_row() {
    let (repo, _cache, _dir) = test_repo().await;

    repo.record_prepared_at(&prepared_event("u1", 7, 1_000), HOUR_START + 1_000)
        .await
        .unwrap();
    let first = repo.aggregate_hour(HOUR_START).await.unwrap();
    assert_eq!(first.total_uploads, 1);

    // A late event lands inside the already-aggregated hour
    repo.record_prepared_at(&prepared_event("u2", 7, 1_000), HOUR_START + 2_000)
        .await
        .unwrap();
    let second = repo.aggregate_hour(HOUR_START).await.unwrap();
    assert_eq!(second.total_uploads, 2);

    let rows = repo
        .rollups_for_day_range("2024-07-01", "2024-07-01")
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].total_uploads, 2);
}

#[tokio::test]
async fn empty_hour_yields_zero_row() {
    let (repo, _cache, _dir) = test_repo().await;
    let rollup = repo.aggregate_hour(HOUR_START).await.unwrap();
    assert_eq!(rollup.total_uploads, 0);
    assert_eq!(rollup.completion_rate, 0.0);
    assert_eq!(rollup.avg_duration, 0.0);
    assert!(rollup.duration_histogram.is_empty());
}

#[tokio::test]
async fn day_range_query_spans_hours_in_order() {
    let (repo, _cache, _dir) = test_repo().await;

    for offset_hours in [0i64, 1, 26] {
        let start = HOUR_START + offset_hours * 3_600_000;
        repo.record_prepared_at(
            &prepared_event(&format!("u{offset_hours}"), 7, 1_000),
            start + 1_000,
        )
        .await
        .unwrap();
        repo.aggregate_hour(start).await.unwrap();
    }

    let all = repo
        .rollups_for_day_range("2024-07-01", "2024-07-02")
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].hour, "2024-07-01-10");
    assert_eq!(all[1].hour, "2024-07-01-11");
    assert_eq!(all[2].hour, "2024-07-02-12");

    let first_day_only = repo
        .rollups_for_day_range("2024-07-01", "2024-07-01")
        .await
        .unwrap();
    assert_eq!(first_day_only.len(), 2);

    // Completed upload synthesized with metadata duration in a fresh hour
    let mut late = completed_event("late", 5);
    late.metadata = CompletedMetadata {
        final_file_size: Some(1_000),
        processing_time: None,
        upload_duration: Some(7.0),
    };
    let late_hour = HOUR_START + 48 * 3_600_000;
    repo.record_completed_at(&late, late_hour + 500).await.unwrap();
    let rollup = repo.aggregate_hour(late_hour).await.unwrap();
    assert_eq!(rollup.duration_histogram.get("0-10s"), Some(&1));
}
