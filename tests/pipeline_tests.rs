// Pipeline integration: scrape a stub upstream, process cycles, check the
// merged dashboard output and bucket writes

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use soketi_metrics::bucket_store::BucketStore;
use soketi_metrics::cache::{MemoryCache, MetricsCache};
use soketi_metrics::config::{DerivedConfig, ScrapeConfig};
use soketi_metrics::delta::CounterDeltaTracker;
use soketi_metrics::pipeline::{CycleOutcome, Pipeline, dashboard_stats};
use soketi_metrics::scrape::ScrapeClient;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Clone)]
struct StubState {
    payloads: Arc<Mutex<Vec<String>>>,
    status: StatusCode,
}

async fn metrics_handler(State(state): State<StubState>) -> (StatusCode, String) {
    if state.status != StatusCode::OK {
        return (state.status, String::new());
    }
    let mut payloads = state.payloads.lock().unwrap();
    let body = if payloads.len() > 1 {
        payloads.remove(0)
    } else {
        payloads.first().cloned().unwrap_or_default()
    };
    (StatusCode::OK, body)
}

/// Serve canned exposition payloads (one per request, last one repeats) on an
/// ephemeral port. `/usage` always 404s, which the pipeline must tolerate.
async fn spawn_stub(payloads: Vec<&str>, status: StatusCode) -> String {
    let state = StubState {
        payloads: Arc::new(Mutex::new(payloads.into_iter().map(String::from).collect())),
        status,
    };
    let app = axum::Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn build_pipeline(source_url: String, cache: Arc<dyn MetricsCache>) -> Pipeline {
    let scrape_cfg = ScrapeConfig {
        source_url,
        interval_secs: 60,
        timeout_ms: 2_000,
        retries: 0,
        counter_metrics: vec![
            "soketi_new_connections_total".to_string(),
            "soketi_socket_received_bytes".to_string(),
        ],
    };
    let client = ScrapeClient::new(&scrape_cfg).unwrap();
    let tracker = CounterDeltaTracker::new(cache.clone(), scrape_cfg.counter_metrics.clone());
    let buckets = Arc::new(BucketStore::new(
        cache.clone(),
        Duration::from_secs(7_200),
        Duration::from_secs(86_400),
    ));
    let (tx, _) = broadcast::channel(10);
    Pipeline::new(
        client,
        tracker,
        buckets,
        cache,
        DerivedConfig::default(),
        scrape_cfg.interval_secs,
        tx,
    )
}

#[tokio::test]
async fn two_cycles_produce_counter_delta_and_rates() {
    let url = spawn_stub(
        vec![
            "soketi_connected 42\nsoketi_new_connections_total{port=\"6001\"} 100\n",
            "soketi_connected 55\nsoketi_new_connections_total{port=\"6001\"} 137\n",
        ],
        StatusCode::OK,
    )
    .await;
    let cache: Arc<dyn MetricsCache> = Arc::new(MemoryCache::new());
    let pipeline = build_pipeline(url, cache.clone());

    let first = pipeline.run_cycle().await.unwrap();
    assert_eq!(first, CycleOutcome::Completed { samples: 2 });

    let second = pipeline.run_cycle().await.unwrap();
    assert_eq!(second, CycleOutcome::Completed { samples: 2 });

    let stats = dashboard_stats(cache.as_ref()).unwrap();
    let counter = &stats.snapshot.counters[r#"soketi_new_connections_total{port="6001"}"#];
    assert_eq!(counter.total, 137.0);
    assert_eq!(counter.delta, 37.0);
    assert_eq!(stats.snapshot.gauges["soketi_connected"], 55.0);
    // 37 new connections over a 60s nominal interval
    assert_eq!(stats.derived.connections_per_min, 37.0);
    // 42 -> 55 is a >1.2x increase
    assert_eq!(
        stats.derived.trends["soketi_connected"].trend,
        soketi_metrics::models::Trend::Increasing
    );
}

#[tokio::test]
async fn cycle_writes_minute_and_hour_buckets() {
    let url = spawn_stub(vec!["soketi_connected 10\n"], StatusCode::OK).await;
    let cache: Arc<dyn MetricsCache> = Arc::new(MemoryCache::new());
    let pipeline = build_pipeline(url, cache.clone());
    pipeline.run_cycle().await.unwrap();

    let buckets = BucketStore::new(
        cache.clone(),
        Duration::from_secs(7_200),
        Duration::from_secs(86_400),
    );
    let now = soketi_metrics::upload_repo::now_ms() as u64;
    let minutes = buckets.minute_window(now, 2);
    assert_eq!(minutes.len(), 1);
    assert_eq!(minutes[0].1.gauges["soketi_connected"], 10.0);

    let hours = buckets.hour_window(now, 1);
    assert_eq!(hours.len(), 1);
    assert_eq!(hours[0].1.gauges["soketi_connected"].count, 1);
    assert_eq!(hours[0].1.gauges["soketi_connected"].peak, 10.0);
}

#[tokio::test]
async fn upstream_failure_aborts_cycle_without_writes() {
    let url = spawn_stub(vec![""], StatusCode::INTERNAL_SERVER_ERROR).await;
    let cache: Arc<dyn MetricsCache> = Arc::new(MemoryCache::new());
    let pipeline = build_pipeline(url, cache.clone());

    let err = pipeline.run_cycle().await.unwrap_err();
    assert!(err.to_string().contains("500"), "got: {err}");
    assert!(dashboard_stats(cache.as_ref()).is_none());
    assert!(cache.get("metrics:current").is_none());
}
