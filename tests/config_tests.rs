// Config loading and validation tests

use soketi_metrics::config::AppConfig;

const VALID_CONFIG: &str = r#"
[server]
port = 8090
host = "0.0.0.0"

[database]
path = "data/metrics.db"
max_pool_size = 10

[scrape]
source_url = "http://127.0.0.1:9601"
interval_secs = 15

[monitoring]
stats_log_interval_secs = 60

[publishing]
broadcast_capacity = 60
"#;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.server.port, 8090);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.database.path, "data/metrics.db");
    assert_eq!(config.scrape.source_url, "http://127.0.0.1:9601");
    assert_eq!(config.scrape.interval_secs, 15);
    assert_eq!(config.publishing.broadcast_capacity, 60);
}

#[test]
fn test_config_applies_defaults() {
    let config = AppConfig::load_from_str(VALID_CONFIG).unwrap();
    assert_eq!(config.database.retention_days, 30);
    assert_eq!(config.scrape.timeout_ms, 5_000);
    assert_eq!(config.scrape.retries, 2);
    assert!(
        config
            .scrape
            .counter_metrics
            .iter()
            .any(|m| m == "soketi_new_connections_total")
    );
    assert_eq!(config.cache.minute_ttl_secs, 7_200);
    assert_eq!(config.cache.hour_ttl_secs, 86_400);
    assert_eq!(config.derived.increase_factor, 1.2);
    assert_eq!(config.derived.decrease_factor, 0.8);
    assert_eq!(config.rollup.schedule.as_deref(), Some("0 5 * * * *"));
    assert_eq!(config.rollup.backfill_hours, 24);
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    let bad = VALID_CONFIG.replace("port = 8090", "port = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.port"));
}

#[test]
fn test_config_validation_rejects_empty_db_path() {
    let bad = VALID_CONFIG.replace("path = \"data/metrics.db\"", "path = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("database.path"));
}

#[test]
fn test_config_validation_rejects_empty_source_url() {
    let bad = VALID_CONFIG.replace("source_url = \"http://127.0.0.1:9601\"", "source_url = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("scrape.source_url"));
}

#[test]
fn test_config_validation_rejects_zero_interval() {
    let bad = VALID_CONFIG.replace("interval_secs = 15", "interval_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("scrape.interval_secs"));
}

#[test]
fn test_config_validation_rejects_bad_trend_factors() {
    let bad = format!("{VALID_CONFIG}\n[derived]\nincrease_factor = 0.9\n");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("derived.increase_factor"));

    let bad = format!("{VALID_CONFIG}\n[derived]\ndecrease_factor = 1.5\n");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("derived.decrease_factor"));
}

#[test]
fn test_config_validation_rejects_inverted_intensity_bands() {
    let bad = format!(
        "{VALID_CONFIG}\n[derived]\nbytes_rate_medium = 2000000.0\nbytes_rate_high = 1000000.0\n"
    );
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("bytes_rate_medium"));
}

#[test]
fn test_config_validation_rejects_bad_cron() {
    let bad = format!("{VALID_CONFIG}\n[rollup]\nschedule = \"not a cron\"\n");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("rollup.schedule"));
}
