// HTTP + WebSocket routes

mod events;
mod http;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use crate::bucket_store::BucketStore;
use crate::cache::MetricsCache;
use crate::models::DashboardStats;
use crate::upload_repo::UploadRepo;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) stats_tx: broadcast::Sender<DashboardStats>,
    pub(crate) cache: Arc<dyn MetricsCache>,
    pub(crate) buckets: Arc<BucketStore>,
    pub(crate) upload_repo: Arc<UploadRepo>,
}

pub fn app(
    stats_tx: broadcast::Sender<DashboardStats>,
    cache: Arc<dyn MetricsCache>,
    buckets: Arc<BucketStore>,
    upload_repo: Arc<UploadRepo>,
) -> Router {
    let state = AppState {
        stats_tx,
        cache,
        buckets,
        upload_repo,
    };
    Router::new()
        .route("/", get(|| async { "soketi-metrics" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route("/api/stats/current", get(http::current_stats_handler)) // GET /api/stats/current
        .route("/api/stats/minutes", get(http::minute_stats_handler)) // GET /api/stats/minutes?window=N
        .route("/api/stats/hours", get(http::hour_stats_handler)) // GET /api/stats/hours?window=N
        .route("/api/uploads/summary", get(http::upload_summary_handler)) // GET /api/uploads/summary
        .route("/api/uploads/hourly", get(http::upload_hourly_handler)) // GET /api/uploads/hourly?from=..&to=..
        .route("/api/events/prepared", post(events::prepared_handler)) // POST /api/events/prepared
        .route("/api/events/completed", post(events::completed_handler)) // POST /api/events/completed
        .route("/api/events/failed", post(events::failed_handler)) // POST /api/events/failed
        .route("/ws/stats", get(ws::ws_stats)) // WS /ws/stats
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
