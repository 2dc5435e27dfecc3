// POST handlers for upload lifecycle event ingestion.
// Validation failures name every offending field; durable failures surface
// as 500 after the repo has logged the identifiers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::AppState;
use crate::models::{CompletedEvent, FailedEvent, PreparedEvent};
use crate::upload_repo::UploadError;

pub(super) async fn prepared_handler(
    State(state): State<AppState>,
    axum::Json(event): axum::Json<PreparedEvent>,
) -> Response {
    respond(state.upload_repo.record_prepared(&event).await)
}

pub(super) async fn completed_handler(
    State(state): State<AppState>,
    axum::Json(event): axum::Json<CompletedEvent>,
) -> Response {
    respond(state.upload_repo.record_completed(&event).await)
}

pub(super) async fn failed_handler(
    State(state): State<AppState>,
    axum::Json(event): axum::Json<FailedEvent>,
) -> Response {
    respond(state.upload_repo.record_failed(&event).await)
}

fn respond(result: Result<(), UploadError>) -> Response {
    match result {
        Ok(()) => (
            StatusCode::ACCEPTED,
            axum::Json(serde_json::json!({ "status": "recorded" })),
        )
            .into_response(),
        Err(UploadError::Validation(v)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            axum::Json(serde_json::json!({
                "error": "validation",
                "fields": v.fields,
            })),
        )
            .into_response(),
        Err(UploadError::Db(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            axum::Json(serde_json::json!({ "error": "storage" })),
        )
            .into_response(),
    }
}
