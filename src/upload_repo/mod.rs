// SQLite upload lifecycle store + real-time cache counters.
// One row per (upload_id, event_type); completion/failure transitions the
// prepared row in place with a status-guarded UPDATE, so there is no
// select-then-update window for concurrent terminal events to slip through.

pub mod buckets;
pub mod rollup;

use crate::bucket_store::{day_key, hour_key};
use crate::cache::MetricsCache;
use crate::models::{
    CompletedEvent, FailedEvent, HourlyRollup, PreparedEvent, UploadEventRow, UploadSummary,
};
use buckets::{DURATION_BUCKET_LABELS, duration_bucket};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

const KEY_PREPARED: &str = "uploads:prepared";
const KEY_COMPLETED: &str = "uploads:completed";
const KEY_FAILED: &str = "uploads:failed";
const KEY_AVG_DURATION: &str = "uploads:avg_duration";

const HOURLY_COUNTER_TTL: Duration = Duration::from_secs(24 * 3600);
const DAILY_COUNTER_TTL: Duration = Duration::from_secs(48 * 3600);

/// Event-ingestion input failed validation. Carries every offending field so
/// the caller can report them all at once.
#[derive(Debug, thiserror::Error)]
#[error("missing or invalid fields: {}", fields.join(", "))]
pub struct ValidationError {
    pub fields: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Cache slot for the online duration average.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningAvg {
    pub avg: f64,
    pub count: u64,
}

pub struct UploadRepo {
    pool: SqlitePool,
    cache: Arc<dyn MetricsCache>,
    retention_ms: i64,
}

impl UploadRepo {
    pub async fn connect(
        path: &str,
        max_pool_size: u32,
        retention_days: u32,
        cache: Arc<dyn MetricsCache>,
    ) -> anyhow::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_pool_size)
            .connect_with(opts)
            .await?;
        let retention_ms = (retention_days as i64) * 24 * 60 * 60 * 1000;
        Ok(Self {
            pool,
            cache,
            retention_ms,
        })
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS upload_metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                upload_id TEXT NOT NULL,
                user_id INTEGER,
                video_id INTEGER,
                event_type TEXT NOT NULL,
                status TEXT NOT NULL,
                file_size INTEGER,
                file_name TEXT,
                chunk_count INTEGER,
                chunk_size INTEGER,
                chunks_completed INTEGER,
                percentage_completed REAL,
                bytes_uploaded INTEGER,
                prepared_at INTEGER,
                started_at INTEGER,
                completed_at INTEGER,
                failed_at INTEGER,
                upload_duration REAL,
                processing_time REAL,
                estimated_duration REAL,
                error_message TEXT,
                error_code TEXT,
                error_stage TEXT,
                retryable INTEGER,
                attempt_number INTEGER,
                upload_speed REAL,
                connection_quality TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_upload_metrics_upload_event
             ON upload_metrics(upload_id, event_type)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_upload_metrics_created_at ON upload_metrics(created_at)",
        )
        .execute(&self.pool)
        .await?;

        rollup::init_rollup_table(&self.pool).await?;

        Ok(())
    }

    pub async fn record_prepared(&self, event: &PreparedEvent) -> Result<(), UploadError> {
        self.record_prepared_at(event, now_ms()).await
    }

    #[instrument(skip(self, event), fields(repo = "uploads", operation = "record_prepared"))]
    pub async fn record_prepared_at(
        &self,
        event: &PreparedEvent,
        now: i64,
    ) -> Result<(), UploadError> {
        let mut missing = Vec::new();
        if event.upload_id.as_deref().is_none_or(str::is_empty) {
            missing.push("uploadId".to_string());
        }
        if event.user_id.is_none() {
            missing.push("userId".to_string());
        }
        if !missing.is_empty() {
            return Err(ValidationError { fields: missing }.into());
        }
        let upload_id = event.upload_id.as_deref().unwrap_or_default();

        let result = sqlx::query(
            r#"
            INSERT INTO upload_metrics
                (upload_id, user_id, event_type, status,
                 file_size, file_name, chunk_count, chunk_size, estimated_duration,
                 prepared_at, created_at)
            VALUES ($1, $2, 'prepared', 'prepared', $3, $4, $5, $6, $7, $8, $8)
            ON CONFLICT(upload_id, event_type) DO NOTHING
            "#,
        )
        .bind(upload_id)
        .bind(event.user_id)
        .bind(event.metadata.file_size)
        .bind(event.metadata.file_name.as_deref())
        .bind(event.metadata.chunk_count)
        .bind(event.metadata.chunk_size)
        .bind(event.metadata.estimated_duration)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(upload_id = %upload_id, error = %e, "durable write failed: record_prepared");
            e
        })?;

        if result.rows_affected() == 0 {
            tracing::debug!(upload_id = %upload_id, "duplicate prepared event ignored");
            return Ok(());
        }

        self.bump_counters(KEY_PREPARED, now);
        Ok(())
    }

    pub async fn record_completed(&self, event: &CompletedEvent) -> Result<(), UploadError> {
        self.record_completed_at(event, now_ms()).await
    }

    #[instrument(skip(self, event), fields(repo = "uploads", operation = "record_completed"))]
    pub async fn record_completed_at(
        &self,
        event: &CompletedEvent,
        now: i64,
    ) -> Result<(), UploadError> {
        let mut missing = Vec::new();
        if event.upload_id.as_deref().is_none_or(str::is_empty) {
            missing.push("uploadId".to_string());
        }
        if event.video_id.is_none() {
            missing.push("videoId".to_string());
        }
        if !missing.is_empty() {
            return Err(ValidationError { fields: missing }.into());
        }
        let upload_id = event.upload_id.as_deref().unwrap_or_default();

        let recorded = self
            .transition_completed(upload_id, event, now)
            .await
            .map_err(|e| {
                tracing::error!(upload_id = %upload_id, error = %e, "durable write failed: record_completed");
                e
            })?;

        if let Some(duration) = recorded {
            self.bump_counters(KEY_COMPLETED, now);
            if let Some(secs) = duration {
                self.cache.increment(
                    &format!("uploads:duration_bucket:{}", duration_bucket(secs)),
                    1.0,
                    None,
                );
                fold_running_avg(self.cache.as_ref(), KEY_AVG_DURATION, secs);
            }
        }
        Ok(())
    }

    /// Returns `None` when the upload was already terminal (nothing
    /// recorded), `Some(duration)` otherwise.
    async fn transition_completed(
        &self,
        upload_id: &str,
        event: &CompletedEvent,
        now: i64,
    ) -> Result<Option<Option<f64>>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let prepared = sqlx::query(
            "SELECT prepared_at, file_size FROM upload_metrics
             WHERE upload_id = $1 AND status = 'prepared'",
        )
        .bind(upload_id)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = if let Some(row) = prepared {
            let prepared_at: Option<i64> = row.try_get("prepared_at")?;
            let stored_size: Option<i64> = row.try_get("file_size")?;
            let duration = prepared_at.map(|t| ((now - t).max(0)) as f64 / 1000.0);
            let bytes = event.metadata.final_file_size.or(stored_size);
            let speed = match (bytes, duration) {
                (Some(b), Some(d)) if d > 0.0 => Some(b as f64 / d),
                _ => None,
            };

            let updated = sqlx::query(
                r#"
                UPDATE upload_metrics SET
                    event_type = 'completed', status = 'completed',
                    video_id = $2, completed_at = $3,
                    upload_duration = $4, processing_time = $5,
                    file_size = COALESCE($6, file_size), upload_speed = $7
                WHERE upload_id = $1 AND status = 'prepared'
                "#,
            )
            .bind(upload_id)
            .bind(event.video_id)
            .bind(now)
            .bind(duration)
            .bind(event.metadata.processing_time)
            .bind(event.metadata.final_file_size)
            .bind(speed)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                // Lost a terminal race inside the transaction window.
                None
            } else {
                Some(duration)
            }
        } else {
            // Prepared event was lost: synthesize a terminal row from the
            // supplied metadata. The NOT EXISTS guard keeps a late event from
            // adding a second row when the upload is already terminal.
            let duration = event.metadata.upload_duration;
            let speed = match (event.metadata.final_file_size, duration) {
                (Some(b), Some(d)) if d > 0.0 => Some(b as f64 / d),
                _ => None,
            };
            let inserted = sqlx::query(
                r#"
                INSERT INTO upload_metrics
                    (upload_id, user_id, video_id, event_type, status,
                     file_size, completed_at, upload_duration, processing_time,
                     upload_speed, created_at)
                SELECT $1, $2, $3, 'completed', 'completed', $4, $5, $6, $7, $8, $5
                WHERE NOT EXISTS (SELECT 1 FROM upload_metrics WHERE upload_id = $1)
                "#,
            )
            .bind(upload_id)
            .bind(event.user_id)
            .bind(event.video_id)
            .bind(event.metadata.final_file_size)
            .bind(now)
            .bind(duration)
            .bind(event.metadata.processing_time)
            .bind(speed)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 0 {
                None
            } else {
                Some(duration)
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    pub async fn record_failed(&self, event: &FailedEvent) -> Result<(), UploadError> {
        self.record_failed_at(event, now_ms()).await
    }

    #[instrument(skip(self, event), fields(repo = "uploads", operation = "record_failed"))]
    pub async fn record_failed_at(&self, event: &FailedEvent, now: i64) -> Result<(), UploadError> {
        if event.upload_id.as_deref().is_none_or(str::is_empty) {
            return Err(ValidationError {
                fields: vec!["uploadId".to_string()],
            }
            .into());
        }
        let upload_id = event.upload_id.as_deref().unwrap_or_default();

        let recorded = self
            .transition_failed(upload_id, event, now)
            .await
            .map_err(|e| {
                tracing::error!(upload_id = %upload_id, error = %e, "durable write failed: record_failed");
                e
            })?;

        if recorded {
            self.bump_counters(KEY_FAILED, now);
        }
        Ok(())
    }

    async fn transition_failed(
        &self,
        upload_id: &str,
        event: &FailedEvent,
        now: i64,
    ) -> Result<bool, sqlx::Error> {
        let f = &event.failure_data;
        let attempt = f.attempt_number.unwrap_or(1);
        let mut tx = self.pool.begin().await?;

        let prepared = sqlx::query(
            "SELECT prepared_at FROM upload_metrics WHERE upload_id = $1 AND status = 'prepared'",
        )
        .bind(upload_id)
        .fetch_optional(&mut *tx)
        .await?;

        let recorded = if let Some(row) = prepared {
            let prepared_at: Option<i64> = row.try_get("prepared_at")?;
            let elapsed = prepared_at.map(|t| ((now - t).max(0)) as f64 / 1000.0);

            let updated = sqlx::query(
                r#"
                UPDATE upload_metrics SET
                    event_type = 'failed', status = 'failed',
                    failed_at = $2, upload_duration = $3,
                    error_message = $4, error_code = $5, error_stage = $6,
                    retryable = $7, attempt_number = $8,
                    percentage_completed = $9, chunks_completed = $10, bytes_uploaded = $11
                WHERE upload_id = $1 AND status = 'prepared'
                "#,
            )
            .bind(upload_id)
            .bind(now)
            .bind(elapsed)
            .bind(f.message.as_deref())
            .bind(f.code.as_deref())
            .bind(f.stage.as_deref())
            .bind(f.retryable)
            .bind(attempt)
            .bind(f.percentage_completed)
            .bind(f.chunks_completed)
            .bind(f.bytes_uploaded)
            .execute(&mut *tx)
            .await?;
            updated.rows_affected() > 0
        } else {
            let inserted = sqlx::query(
                r#"
                INSERT INTO upload_metrics
                    (upload_id, user_id, event_type, status, failed_at,
                     error_message, error_code, error_stage, retryable, attempt_number,
                     percentage_completed, chunks_completed, bytes_uploaded, created_at)
                SELECT $1, $2, 'failed', 'failed', $3, $4, $5, $6, $7, $8, $9, $10, $11, $3
                WHERE NOT EXISTS (SELECT 1 FROM upload_metrics WHERE upload_id = $1)
                "#,
            )
            .bind(upload_id)
            .bind(event.user_id)
            .bind(now)
            .bind(f.message.as_deref())
            .bind(f.code.as_deref())
            .bind(f.stage.as_deref())
            .bind(f.retryable)
            .bind(attempt)
            .bind(f.percentage_completed)
            .bind(f.chunks_completed)
            .bind(f.bytes_uploaded)
            .execute(&mut *tx)
            .await?;
            inserted.rows_affected() > 0
        };

        tx.commit().await?;
        Ok(recorded)
    }

    /// Latest row for an upload id (diagnostics and tests).
    pub async fn get_event(&self, upload_id: &str) -> anyhow::Result<Option<UploadEventRow>> {
        let row = sqlx::query("SELECT * FROM upload_metrics WHERE upload_id = $1 ORDER BY id DESC LIMIT 1")
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| parse_event_row(&r)).transpose()
    }

    /// Rows created in `[from_ms, to_ms)`, ascending.
    #[instrument(skip(self), fields(repo = "uploads", operation = "events_in_range"))]
    pub async fn events_in_range(
        &self,
        from_ms: i64,
        to_ms: i64,
    ) -> anyhow::Result<Vec<UploadEventRow>> {
        let rows = sqlx::query(
            "SELECT * FROM upload_metrics WHERE created_at >= $1 AND created_at < $2 ORDER BY created_at ASC",
        )
        .bind(from_ms)
        .bind(to_ms)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(parse_event_row).collect()
    }

    /// Roll one closed hour of events into its durable summary row.
    /// Idempotent: the upsert overwrites any previous row for the hour.
    #[instrument(skip(self), fields(repo = "uploads", operation = "aggregate_hour"))]
    pub async fn aggregate_hour(&self, hour_start_ms: i64) -> anyhow::Result<HourlyRollup> {
        let hour_end_ms = hour_start_ms + 3_600_000;
        let events = self.events_in_range(hour_start_ms, hour_end_ms).await?;
        let summary = rollup::build_rollup(hour_key(hour_start_ms as u64), &events);
        rollup::upsert_rollup(&self.pool, &summary).await?;
        Ok(summary)
    }

    /// Rollup rows for a day range (`YYYY-MM-DD`, inclusive), ascending by hour.
    pub async fn rollups_for_day_range(
        &self,
        from_day: &str,
        to_day: &str,
    ) -> anyhow::Result<Vec<HourlyRollup>> {
        rollup::rollups_in_key_range(
            &self.pool,
            &format!("{from_day}-00"),
            &format!("{to_day}-23"),
        )
        .await
    }

    /// Delete event rows older than the retention window. Rollups are kept.
    #[instrument(skip(self), fields(repo = "uploads", operation = "prune_old_events"))]
    pub async fn prune_old_events(&self) -> anyhow::Result<u64> {
        let cutoff = now_ms() - self.retention_ms;
        let r = sqlx::query("DELETE FROM upload_metrics WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(r.rows_affected())
    }

    /// Real-time summary from the cache counters; no database access.
    pub fn realtime_summary(&self) -> UploadSummary {
        realtime_summary(self.cache.as_ref())
    }

    /// Global + hourly + daily counter bump. Cache writes are best-effort by
    /// design; a lost increment skews the real-time view only, never the
    /// durable rows.
    fn bump_counters(&self, prefix: &str, now: i64) {
        self.cache.increment(prefix, 1.0, None);
        self.cache.increment(
            &format!("{prefix}:hour:{}", hour_key(now as u64)),
            1.0,
            Some(HOURLY_COUNTER_TTL),
        );
        self.cache.increment(
            &format!("{prefix}:day:{}", day_key(now as u64)),
            1.0,
            Some(DAILY_COUNTER_TTL),
        );
    }
}

/// Summary of the real-time upload counters held in a cache.
pub fn realtime_summary(cache: &dyn MetricsCache) -> UploadSummary {
    let read = |key: &str| -> u64 {
        cache
            .get(key)
            .and_then(|v| v.as_f64())
            .map_or(0, |v| v.max(0.0) as u64)
    };
    let prepared = read(KEY_PREPARED);
    let completed = read(KEY_COMPLETED);
    let failed = read(KEY_FAILED);
    let avg: RunningAvg = crate::cache::get_json(cache, KEY_AVG_DURATION).unwrap_or_default();

    let mut duration_buckets = BTreeMap::new();
    for label in DURATION_BUCKET_LABELS {
        let count = read(&format!("uploads:duration_bucket:{label}"));
        if count > 0 {
            duration_buckets.insert(label.to_string(), count);
        }
    }

    UploadSummary {
        prepared,
        completed,
        failed,
        active_uploads: prepared.saturating_sub(completed).saturating_sub(failed),
        completion_rate: if prepared > 0 {
            completed as f64 / prepared as f64 * 100.0
        } else {
            0.0
        },
        avg_duration_secs: avg.avg,
        duration_buckets,
    }
}

/// Online mean via compare-and-swap; bounded retries keep a pathological
/// contention burst from spinning.
fn fold_running_avg(cache: &dyn MetricsCache, key: &str, x: f64) {
    for _ in 0..8 {
        let current = cache.get(key);
        let parsed: RunningAvg = current
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let next = RunningAvg {
            avg: (parsed.avg * parsed.count as f64 + x) / (parsed.count as f64 + 1.0),
            count: parsed.count + 1,
        };
        let Ok(value) = serde_json::to_value(&next) else {
            return;
        };
        if cache.compare_and_swap(key, current.as_ref(), value, None) {
            return;
        }
    }
    tracing::warn!(key, "running average update contended, dropping sample");
}

fn parse_event_row(row: &SqliteRow) -> anyhow::Result<UploadEventRow> {
    Ok(UploadEventRow {
        upload_id: row.try_get("upload_id")?,
        user_id: row.try_get("user_id")?,
        video_id: row.try_get("video_id")?,
        event_type: row.try_get("event_type")?,
        status: row.try_get("status")?,
        file_size: row.try_get("file_size")?,
        file_name: row.try_get("file_name")?,
        chunk_count: row.try_get("chunk_count")?,
        chunk_size: row.try_get("chunk_size")?,
        chunks_completed: row.try_get("chunks_completed")?,
        percentage_completed: row.try_get("percentage_completed")?,
        bytes_uploaded: row.try_get("bytes_uploaded")?,
        prepared_at: row.try_get("prepared_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        failed_at: row.try_get("failed_at")?,
        upload_duration: row.try_get("upload_duration")?,
        processing_time: row.try_get("processing_time")?,
        estimated_duration: row.try_get("estimated_duration")?,
        error_message: row.try_get("error_message")?,
        error_code: row.try_get("error_code")?,
        error_stage: row.try_get("error_stage")?,
        retryable: row.try_get("retryable")?,
        attempt_number: row.try_get("attempt_number")?,
        upload_speed: row.try_get("upload_speed")?,
        connection_quality: row.try_get("connection_quality")?,
        created_at: row.try_get("created_at")?,
    })
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
