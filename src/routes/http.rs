// GET handlers: version, current stats, time-series windows, rollups

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;

use super::AppState;
use crate::pipeline;
use crate::upload_repo::now_ms;
use crate::version::{NAME, VERSION};

const MINUTE_WINDOW_MAX: usize = 60;
const HOUR_WINDOW_MAX: usize = 24;

/// GET /version — returns service name and version (from Cargo.toml at build time).
pub(super) async fn version_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "name": NAME,
        "version": VERSION,
    }))
}

/// GET /api/stats/current — merged dashboard stats from the latest cycle.
/// Empty defaults before the first cycle lands.
pub(super) async fn current_stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = pipeline::dashboard_stats(state.cache.as_ref()).unwrap_or_default();
    axum::Json(stats)
}

#[derive(Deserialize)]
pub(super) struct WindowParams {
    window: Option<usize>,
}

/// GET /api/stats/minutes?window=N — minute buckets for the last N minutes
/// (default and max 60). Minutes with no scrape are omitted.
pub(super) async fn minute_stats_handler(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> impl IntoResponse {
    let window = params
        .window
        .unwrap_or(MINUTE_WINDOW_MAX)
        .clamp(1, MINUTE_WINDOW_MAX);
    let buckets = state.buckets.minute_window(now_ms() as u64, window);
    axum::Json(
        buckets
            .into_iter()
            .map(|(key, bucket)| serde_json::json!({ "key": key, "data": bucket }))
            .collect::<Vec<_>>(),
    )
}

/// GET /api/stats/hours?window=N — hour buckets for the last N hours
/// (default 6, max 24).
pub(super) async fn hour_stats_handler(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> impl IntoResponse {
    let window = params.window.unwrap_or(6).clamp(1, HOUR_WINDOW_MAX);
    let buckets = state.buckets.hour_window(now_ms() as u64, window);
    axum::Json(
        buckets
            .into_iter()
            .map(|(key, bucket)| serde_json::json!({ "key": key, "data": bucket }))
            .collect::<Vec<_>>(),
    )
}

/// GET /api/uploads/summary — real-time counters, active uploads, completion rate.
pub(super) async fn upload_summary_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.upload_repo.realtime_summary())
}

#[derive(Deserialize)]
pub(super) struct DayRangeParams {
    from: String,
    to: String,
}

/// GET /api/uploads/hourly?from=YYYY-MM-DD&to=YYYY-MM-DD — durable rollup
/// rows for a day range (inclusive).
pub(super) async fn upload_hourly_handler(
    State(state): State<AppState>,
    Query(params): Query<DayRangeParams>,
) -> axum::response::Response {
    if !valid_day(&params.from) || !valid_day(&params.to) {
        return (
            StatusCode::BAD_REQUEST,
            axum::Json(serde_json::json!({
                "error": "validation",
                "fields": ["from", "to"],
            })),
        )
            .into_response();
    }
    match state
        .upload_repo
        .rollups_for_day_range(&params.from, &params.to)
        .await
    {
        Ok(rollups) => axum::Json(rollups).into_response(),
        Err(e) => {
            tracing::warn!(error = %e, from = %params.from, to = %params.to, "rollup range query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(serde_json::json!({ "error": "storage" })),
            )
                .into_response()
        }
    }
}

fn valid_day(s: &str) -> bool {
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
}
