use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub scrape: ScrapeConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub derived: DerivedConfig,
    #[serde(default)]
    pub rollup: RollupConfig,
    pub monitoring: MonitoringConfig,
    pub publishing: PublishingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeConfig {
    /// Base URL of the upstream messaging server's metrics port,
    /// e.g. "http://127.0.0.1:9601". `/metrics` and `/usage` are appended.
    pub source_url: String,
    pub interval_secs: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Metrics treated as counters (delta-tracked). Classification is by
    /// base name; everything else passes through as a gauge.
    #[serde(default = "default_counter_metrics")]
    pub counter_metrics: Vec<String>,
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_retries() -> u32 {
    2
}

fn default_counter_metrics() -> Vec<String> {
    [
        "soketi_new_connections_total",
        "soketi_new_disconnections_total",
        "soketi_socket_received_bytes",
        "soketi_socket_transmitted_bytes",
        "soketi_ws_messages_received_total",
        "soketi_ws_messages_sent_total",
        "soketi_http_calls_received_total",
    ]
    .map(String::from)
    .to_vec()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_minute_ttl_secs")]
    pub minute_ttl_secs: u64,
    #[serde(default = "default_hour_ttl_secs")]
    pub hour_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            minute_ttl_secs: default_minute_ttl_secs(),
            hour_ttl_secs: default_hour_ttl_secs(),
        }
    }
}

fn default_minute_ttl_secs() -> u64 {
    7_200
}

fn default_hour_ttl_secs() -> u64 {
    86_400
}

/// Fixed heuristic thresholds for the derived-metrics analyzer. These are
/// tuning constants, never derived statistically.
#[derive(Debug, Clone, Deserialize)]
pub struct DerivedConfig {
    #[serde(default = "default_connections_counter")]
    pub connections_counter: String,
    #[serde(default = "default_received_bytes_counter")]
    pub received_bytes_counter: String,
    #[serde(default = "default_transmitted_bytes_counter")]
    pub transmitted_bytes_counter: String,
    #[serde(default = "default_increase_factor")]
    pub increase_factor: f64,
    #[serde(default = "default_decrease_factor")]
    pub decrease_factor: f64,
    /// Absolute gauge value above which a trend is flagged as a peak.
    #[serde(default = "default_peak_threshold")]
    pub peak_threshold: f64,
    /// Total byte rate (bytes/sec) boundaries for low/medium/high intensity.
    #[serde(default = "default_bytes_rate_medium")]
    pub bytes_rate_medium: f64,
    #[serde(default = "default_bytes_rate_high")]
    pub bytes_rate_high: f64,
}

impl Default for DerivedConfig {
    fn default() -> Self {
        Self {
            connections_counter: default_connections_counter(),
            received_bytes_counter: default_received_bytes_counter(),
            transmitted_bytes_counter: default_transmitted_bytes_counter(),
            increase_factor: default_increase_factor(),
            decrease_factor: default_decrease_factor(),
            peak_threshold: default_peak_threshold(),
            bytes_rate_medium: default_bytes_rate_medium(),
            bytes_rate_high: default_bytes_rate_high(),
        }
    }
}

fn default_connections_counter() -> String {
    "soketi_new_connections_total".into()
}

fn default_received_bytes_counter() -> String {
    "soketi_socket_received_bytes".into()
}

fn default_transmitted_bytes_counter() -> String {
    "soketi_socket_transmitted_bytes".into()
}

fn default_increase_factor() -> f64 {
    1.2
}

fn default_decrease_factor() -> f64 {
    0.8
}

fn default_peak_threshold() -> f64 {
    500.0
}

fn default_bytes_rate_medium() -> f64 {
    100_000.0
}

fn default_bytes_rate_high() -> f64 {
    1_000_000.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct RollupConfig {
    /// Optional cron expression for the hourly rollup (e.g. "0 5 * * * *" =
    /// five minutes past each hour). Uses local time.
    #[serde(default = "default_rollup_schedule")]
    pub schedule: Option<String>,
    /// Run the rollup every N seconds when schedule is not set.
    #[serde(default = "default_rollup_interval_secs")]
    pub interval_secs: u64,
    /// Closed hours to re-aggregate at startup (downtime recovery).
    #[serde(default = "default_backfill_hours")]
    pub backfill_hours: u32,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            schedule: default_rollup_schedule(),
            interval_secs: default_rollup_interval_secs(),
            backfill_hours: default_backfill_hours(),
        }
    }
}

fn default_rollup_schedule() -> Option<String> {
    Some("0 5 * * * *".to_string())
}

fn default_rollup_interval_secs() -> u64 {
    3_600
}

fn default_backfill_hours() -> u32 {
    24
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringConfig {
    /// How often to log app stats (cycles run, samples seen, cache entries) at INFO level.
    pub stats_log_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublishingConfig {
    /// Max number of dashboard-stats messages kept in the broadcast channel
    /// for /ws/stats (slow clients may lag).
    pub broadcast_capacity: usize,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.retention_days > 0,
            "database.retention_days must be > 0, got {}",
            self.database.retention_days
        );
        anyhow::ensure!(
            !self.scrape.source_url.is_empty(),
            "scrape.source_url must be non-empty"
        );
        anyhow::ensure!(
            self.scrape.interval_secs > 0,
            "scrape.interval_secs must be > 0, got {}",
            self.scrape.interval_secs
        );
        anyhow::ensure!(
            self.scrape.timeout_ms > 0,
            "scrape.timeout_ms must be > 0, got {}",
            self.scrape.timeout_ms
        );
        anyhow::ensure!(
            self.cache.minute_ttl_secs > 0,
            "cache.minute_ttl_secs must be > 0, got {}",
            self.cache.minute_ttl_secs
        );
        anyhow::ensure!(
            self.cache.hour_ttl_secs > 0,
            "cache.hour_ttl_secs must be > 0, got {}",
            self.cache.hour_ttl_secs
        );
        anyhow::ensure!(
            self.derived.increase_factor > 1.0,
            "derived.increase_factor must be > 1.0, got {}",
            self.derived.increase_factor
        );
        anyhow::ensure!(
            self.derived.decrease_factor > 0.0 && self.derived.decrease_factor < 1.0,
            "derived.decrease_factor must be in (0, 1), got {}",
            self.derived.decrease_factor
        );
        anyhow::ensure!(
            self.derived.bytes_rate_medium < self.derived.bytes_rate_high,
            "derived.bytes_rate_medium ({}) must be < derived.bytes_rate_high ({})",
            self.derived.bytes_rate_medium,
            self.derived.bytes_rate_high
        );
        anyhow::ensure!(
            self.rollup.interval_secs > 0,
            "rollup.interval_secs must be > 0, got {}",
            self.rollup.interval_secs
        );
        if let Some(ref schedule) = self.rollup.schedule {
            use std::str::FromStr;
            anyhow::ensure!(
                cron::Schedule::from_str(schedule).is_ok(),
                "rollup.schedule is not a valid cron expression: {}",
                schedule
            );
        }
        anyhow::ensure!(
            self.monitoring.stats_log_interval_secs > 0,
            "monitoring.stats_log_interval_secs must be > 0, got {}",
            self.monitoring.stats_log_interval_secs
        );
        anyhow::ensure!(
            self.publishing.broadcast_capacity > 0,
            "publishing.broadcast_capacity must be > 0, got {}",
            self.publishing.broadcast_capacity
        );
        Ok(())
    }
}
