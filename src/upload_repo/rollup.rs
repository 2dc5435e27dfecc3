// Hourly rollups: schema for the aggregated table + pure aggregation logic.
// Event fetching stays in upload_repo::mod; the upsert keys on the unique
// hour so re-running an hour overwrites instead of duplicating.

use crate::models::{HourlyRollup, UploadEventRow};
use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use std::collections::BTreeMap;

use super::buckets::{duration_bucket, size_bucket};

/// Creates the upload_metrics_hourly table if not present.
pub async fn init_rollup_table(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS upload_metrics_hourly (
            hour TEXT PRIMARY KEY,
            total_uploads INTEGER NOT NULL,
            completed_uploads INTEGER NOT NULL,
            failed_uploads INTEGER NOT NULL,
            total_bytes INTEGER NOT NULL,
            avg_duration REAL NOT NULL,
            avg_speed REAL NOT NULL,
            completion_rate REAL NOT NULL,
            duration_histogram TEXT NOT NULL,
            size_histogram TEXT NOT NULL,
            error_stages TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Aggregate one closed hour of event rows into a rollup. Pure; exposed for
/// unit tests.
pub fn build_rollup(hour: String, events: &[UploadEventRow]) -> HourlyRollup {
    let total_uploads = events.len() as i64;
    let mut completed_uploads = 0i64;
    let mut failed_uploads = 0i64;
    let mut total_bytes = 0i64;
    let mut duration_sum = 0.0;
    let mut duration_count = 0u32;
    let mut speed_sum = 0.0;
    let mut speed_count = 0u32;
    let mut duration_histogram: BTreeMap<String, i64> = BTreeMap::new();
    let mut size_histogram: BTreeMap<String, i64> = BTreeMap::new();
    let mut error_stages: BTreeMap<String, i64> = BTreeMap::new();

    for event in events {
        match event.status.as_str() {
            "completed" => {
                completed_uploads += 1;
                total_bytes += event.file_size.unwrap_or(0);
                if let Some(d) = event.upload_duration {
                    duration_sum += d;
                    duration_count += 1;
                    *duration_histogram
                        .entry(duration_bucket(d).to_string())
                        .or_default() += 1;
                }
                if let Some(s) = event.upload_speed {
                    speed_sum += s;
                    speed_count += 1;
                }
                if let Some(size) = event.file_size {
                    *size_histogram.entry(size_bucket(size).to_string()).or_default() += 1;
                }
            }
            "failed" => {
                failed_uploads += 1;
                total_bytes += event.bytes_uploaded.unwrap_or(0);
                let stage = event.error_stage.as_deref().unwrap_or("unknown");
                *error_stages.entry(stage.to_string()).or_default() += 1;
            }
            _ => {}
        }
    }

    HourlyRollup {
        hour,
        total_uploads,
        completed_uploads,
        failed_uploads,
        total_bytes,
        avg_duration: if duration_count > 0 {
            duration_sum / duration_count as f64
        } else {
            0.0
        },
        avg_speed: if speed_count > 0 {
            speed_sum / speed_count as f64
        } else {
            0.0
        },
        completion_rate: if total_uploads > 0 {
            completed_uploads as f64 / total_uploads as f64 * 100.0
        } else {
            0.0
        },
        duration_histogram,
        size_histogram,
        error_stages,
    }
}

/// Insert-or-overwrite keyed on the unique hour. Histograms are stored as
/// JSON text columns.
pub async fn upsert_rollup(pool: &SqlitePool, rollup: &HourlyRollup) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO upload_metrics_hourly
            (hour, total_uploads, completed_uploads, failed_uploads, total_bytes,
             avg_duration, avg_speed, completion_rate,
             duration_histogram, size_histogram, error_stages)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT(hour) DO UPDATE SET
            total_uploads = excluded.total_uploads,
            completed_uploads = excluded.completed_uploads,
            failed_uploads = excluded.failed_uploads,
            total_bytes = excluded.total_bytes,
            avg_duration = excluded.avg_duration,
            avg_speed = excluded.avg_speed,
            completion_rate = excluded.completion_rate,
            duration_histogram = excluded.duration_histogram,
            size_histogram = excluded.size_histogram,
            error_stages = excluded.error_stages
        "#,
    )
    .bind(&rollup.hour)
    .bind(rollup.total_uploads)
    .bind(rollup.completed_uploads)
    .bind(rollup.failed_uploads)
    .bind(rollup.total_bytes)
    .bind(rollup.avg_duration)
    .bind(rollup.avg_speed)
    .bind(rollup.completion_rate)
    .bind(serde_json::to_string(&rollup.duration_histogram)?)
    .bind(serde_json::to_string(&rollup.size_histogram)?)
    .bind(serde_json::to_string(&rollup.error_stages)?)
    .execute(pool)
    .await?;
    Ok(())
}

/// Rollups with `from_key <= hour <= to_key`, ascending. Hour keys are
/// zero-padded, so lexicographic range matches chronological range.
pub async fn rollups_in_key_range(
    pool: &SqlitePool,
    from_key: &str,
    to_key: &str,
) -> anyhow::Result<Vec<HourlyRollup>> {
    let rows = sqlx::query(
        "SELECT * FROM upload_metrics_hourly WHERE hour >= $1 AND hour <= $2 ORDER BY hour ASC",
    )
    .bind(from_key)
    .bind(to_key)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let duration_histogram: String = row.try_get("duration_histogram")?;
            let size_histogram: String = row.try_get("size_histogram")?;
            let error_stages: String = row.try_get("error_stages")?;
            Ok(HourlyRollup {
                hour: row.try_get("hour")?,
                total_uploads: row.try_get("total_uploads")?,
                completed_uploads: row.try_get("completed_uploads")?,
                failed_uploads: row.try_get("failed_uploads")?,
                total_bytes: row.try_get("total_bytes")?,
                avg_duration: row.try_get("avg_duration")?,
                avg_speed: row.try_get("avg_speed")?,
                completion_rate: row.try_get("completion_rate")?,
                duration_histogram: serde_json::from_str(&duration_histogram)?,
                size_histogram: serde_json::from_str(&size_histogram)?,
                error_stages: serde_json::from_str(&error_stages)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(status: &str) -> UploadEventRow {
        UploadEventRow {
            upload_id: "u".to_string(),
            event_type: status.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn empty_hour_builds_zero_rollup() {
        let r = build_rollup("2024-07-01-10".to_string(), &[]);
        assert_eq!(r.total_uploads, 0);
        assert_eq!(r.completion_rate, 0.0);
        assert!(r.duration_histogram.is_empty());
    }

    #[test]
    fn mixed_hour_counts_and_histograms() {
        let mut completed = event("completed");
        completed.file_size = Some(20 * 1024 * 1024);
        completed.upload_duration = Some(45.0);
        completed.upload_speed = Some(466_033.0);

        let mut completed2 = event("completed");
        completed2.file_size = Some(2 * 1024 * 1024 * 1024);
        completed2.upload_duration = Some(400.0);
        completed2.upload_speed = Some(5_368_709.0);

        let mut failed = event("failed");
        failed.bytes_uploaded = Some(1_000_000);
        failed.error_stage = Some("chunk-upload".to_string());

        let prepared = event("prepared");

        let r = build_rollup(
            "2024-07-01-10".to_string(),
            &[completed, completed2, failed, prepared],
        );
        assert_eq!(r.total_uploads, 4);
        assert_eq!(r.completed_uploads, 2);
        assert_eq!(r.failed_uploads, 1);
        assert_eq!(r.total_bytes, 20 * 1024 * 1024 + 2 * 1024 * 1024 * 1024 + 1_000_000);
        assert_eq!(r.completion_rate, 50.0);
        assert!((r.avg_duration - 222.5).abs() < 1e-9);
        assert_eq!(r.duration_histogram["30-60s"], 1);
        assert_eq!(r.duration_histogram["5m+"], 1);
        assert_eq!(r.size_histogram["10-50MB"], 1);
        assert_eq!(r.size_histogram["1GB+"], 1);
        assert_eq!(r.error_stages["chunk-upload"], 1);
    }

    #[test]
    fn failures_without_stage_group_under_unknown() {
        let r = build_rollup("h".to_string(), &[event("failed")]);
        assert_eq!(r.error_stages["unknown"], 1);
    }
}
