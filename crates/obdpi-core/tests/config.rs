use obdpi_core::analytics::DtMode;
use obdpi_core::config::{ConfigError, LoggerConfig};
use obdpi_core::protocol::Transport;
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_save_then_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("obdpi").join("config.json");

    let mut config = LoggerConfig::default();
    config.adapter.transport = Transport::Tcp;
    config.adapter.host = "10.0.0.5".into();
    config.acquisition.failure_threshold = 3;
    config.analytics.dt_mode = DtMode::Timestamps;
    config.storage.path = dir.path().join("readings.jsonl");
    config.save(&path).unwrap();

    assert_eq!(LoggerConfig::load(&path).unwrap(), config);
}

#[test]
fn test_missing_file_gives_defaults() {
    let dir = tempdir().unwrap();
    let config = LoggerConfig::load_or_default(dir.path().join("absent.json")).unwrap();
    assert_eq!(config, LoggerConfig::default());
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, r#"{"acquisition": {"tick_ms": 0}}"#).unwrap();
    assert!(matches!(LoggerConfig::load(&path), Err(ConfigError::Invalid(_))));

    fs::write(&path, r#"{"analytics": {"sample_interval_secs": -1.0}}"#).unwrap();
    assert!(matches!(LoggerConfig::load(&path), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_syntax_error_reports_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.json");
    fs::write(&path, "{ adapter: ").unwrap();
    let err = LoggerConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
    assert!(err.to_string().contains("config.json"));
}

#[test]
fn test_acquisition_settings_convert() {
    let config = LoggerConfig::default();
    let acquisition = config.acquisition.to_config();
    assert_eq!(acquisition.tick.as_millis(), 1000);
    assert_eq!(acquisition.failure_threshold, 5);
    assert!(acquisition.simulate_on_failure);
}
