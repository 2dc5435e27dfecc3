use anyhow::Result;
use soketi_metrics::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

/// Real-time intervals for housekeeping inside the scrape worker.
const CACHE_PURGE_INTERVAL_SECS: u64 = 300;

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;
    let (tx, _) = broadcast::channel::<models::DashboardStats>(
        app_config.publishing.broadcast_capacity,
    );

    let cache = Arc::new(cache::MemoryCache::new());
    let cache_dyn: Arc<dyn cache::MetricsCache> = cache.clone();

    let upload_repo = Arc::new(
        upload_repo::UploadRepo::connect(
            &app_config.database.path,
            app_config.database.max_pool_size,
            app_config.database.retention_days,
            cache_dyn.clone(),
        )
        .await?,
    );
    upload_repo.init().await?;

    if let Err(e) = backfill::run_backfill(upload_repo.clone(), app_config.rollup.backfill_hours).await
    {
        tracing::warn!(error = %e, "rollup backfill failed; continuing");
    }

    let scrape_client = scrape::ScrapeClient::new(&app_config.scrape)?;
    let tracker = delta::CounterDeltaTracker::new(
        cache_dyn.clone(),
        app_config.scrape.counter_metrics.iter().cloned(),
    );
    let buckets = Arc::new(bucket_store::BucketStore::new(
        cache_dyn.clone(),
        Duration::from_secs(app_config.cache.minute_ttl_secs),
        Duration::from_secs(app_config.cache.hour_ttl_secs),
    ));
    let pipeline = Arc::new(pipeline::Pipeline::new(
        scrape_client,
        tracker,
        buckets.clone(),
        cache_dyn.clone(),
        app_config.derived.clone(),
        app_config.scrape.interval_secs,
        tx.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let worker_handle = worker::spawn(
        worker::WorkerDeps {
            pipeline: pipeline.clone(),
            cache: cache.clone(),
            shutdown_rx,
        },
        worker::WorkerConfig {
            scrape_interval_secs: app_config.scrape.interval_secs,
            stats_log_interval_secs: app_config.monitoring.stats_log_interval_secs,
            purge_interval_secs: CACHE_PURGE_INTERVAL_SECS,
        },
    );
    let _rollup_handle = rollup_worker::spawn(upload_repo.clone(), app_config.rollup.clone());

    let app = routes::app(tx, cache_dyn, buckets, upload_repo);
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    let in_container = std::path::Path::new("/.dockerenv").exists()
        || std::env::var("CONTAINER").as_deref() == Ok("1");

    if in_container {
        // In Docker: run server until error or SIGTERM (no signal handler; avoids immediate exit)
        axum::serve(listener, app).await?;
    } else {
        tokio::select! {
            result = axum::serve(listener, app) => {
                result?;
            }
            _ = async {
                #[cfg(unix)]
                {
                    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                        Ok(s) => s,
                        Err(_) => {
                            let _ = tokio::signal::ctrl_c().await;
                            return;
                        }
                    };
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                #[cfg(not(unix))]
                {
                    tokio::signal::ctrl_c().await
                }
            } => {
                tracing::info!("Received shutdown signal");
                let _ = shutdown_tx.send(());
                let _ = worker_handle.await;
            }
        }
    }

    Ok(())
}
