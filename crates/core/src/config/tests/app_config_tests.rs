use std::io::Write;

use crate::config::models::AppConfig;

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    // 验证默认值
    assert_eq!(config.database.max_connections, 10);
    assert_eq!(config.job.export_batch_size, 500);
    assert!(!config.health.enabled);
    assert!(config.api.enabled);
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[database]
url = "sqlite::memory:"
max_connections = 4
min_connections = 1
connection_timeout_seconds = 10

[job]
default_concurrency = 3
max_concurrency = 20
default_interval_ms = 200
default_retry_limit = 2
max_retry_limit = 5
request_timeout_seconds = 15
launch_queue_capacity = 8
export_batch_size = 500

[job.backoff]
base_delay_ms = 100
max_delay_ms = 2000
multiplier = 2.0
jitter_factor = 0.0

[health]
enabled = true
interval_seconds = 300
channel_delay_ms = 500
disable_threshold_seconds = 20
auto_disable_enabled = true
auto_enable_enabled = true
notify_on_sweep = true

[api]
enabled = true
bind_address = "127.0.0.1:9090"
cors_enabled = false
cors_origins = []
request_timeout_seconds = 30

[observability]
metrics_enabled = true
metrics_endpoint = "/metrics"
log_level = "debug"
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();
    assert_eq!(config.job.default_concurrency, 3);
    assert_eq!(config.job.backoff.max_delay_ms, 2000);
    assert!(config.health.auto_enable_enabled);
    assert_eq!(config.api.bind_address, "127.0.0.1:9090");
    assert_eq!(config.observability.log_level, "debug");
}

#[test]
fn test_invalid_concurrency_rejected() {
    let mut config = AppConfig::default();
    config.job.default_concurrency = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.job.default_concurrency = 100;
    config.job.max_concurrency = 10;
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_database_url_rejected() {
    let mut config = AppConfig::default();
    config.database.url = "postgresql://localhost/gateway".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_toml_round_trip() {
    let config = AppConfig::default();
    let toml_str = config.to_toml().unwrap();
    let parsed = AppConfig::from_toml(&toml_str).unwrap();
    assert_eq!(parsed.job.backoff, config.job.backoff);
    assert_eq!(parsed.api.bind_address, config.api.bind_address);
}

#[test]
fn test_load_from_file_overrides_defaults() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[job]
default_concurrency = 7
max_concurrency = 30
default_interval_ms = 0
default_retry_limit = 1
max_retry_limit = 10
request_timeout_seconds = 30
launch_queue_capacity = 64
export_batch_size = 250

[job.backoff]
base_delay_ms = 500
max_delay_ms = 10000
multiplier = 2.0
jitter_factor = 0.1
"#
    )
    .unwrap();

    let path = file.path().to_str().unwrap().to_string();
    let config = AppConfig::load(Some(&path)).unwrap();
    assert_eq!(config.job.default_concurrency, 7);
    assert_eq!(config.job.export_batch_size, 250);
    // 未覆盖的段落沿用默认值
    assert_eq!(config.database.max_connections, 10);
}

#[test]
fn test_load_missing_file_fails() {
    assert!(AppConfig::load(Some("/nonexistent/gateway.toml")).is_err());
}
