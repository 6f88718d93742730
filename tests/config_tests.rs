// Config loading and validation tests

use meterstream::config::AppConfig;
use meterstream::rollup::vacuum::VacuumSchedule;
use std::time::Duration;

const VALID_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[source]
initial_context = "meter-1"

[buffer]
capacity = 300

[snapshot]
dir = "data/snapshots"

[rollup]
path = "data/rollup.db"

[publishing]
broadcast_capacity = 64

[display]
utc_offset_minutes = 420
"#;

#[test]
fn test_config_loads_from_str_with_defaults() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.source.initial_context, "meter-1");
    assert_eq!(config.source.heartbeat_timeout_ms, 3000);
    assert_eq!(config.source.heartbeat_check_interval_ms, 2000);
    assert!(!config.source.zero_reading_is_offline);
    assert_eq!(config.source.replay_capacity, 64);
    assert_eq!(config.snapshot.save_every, 60);
    assert_eq!(config.snapshot.retention_hours, 24);
    assert_eq!(config.snapshot.fallback_keep, 100);
    assert_eq!(config.snapshot.max_bytes, None);
    assert_eq!(config.rollup.flush_every, 300);
    assert_eq!(config.rollup.retention_days, 7);
    assert_eq!(config.publishing.command_capacity, 64);
}

#[test]
fn test_buffer_and_display_sections_are_optional() {
    let trimmed = VALID_CONFIG
        .replace("[buffer]\ncapacity = 300\n", "")
        .replace("[display]\nutc_offset_minutes = 420\n", "");
    let config = AppConfig::load_from_str(&trimmed).expect("load_from_str");
    assert_eq!(config.buffer.capacity, 300);
    assert_eq!(config.display.utc_offset_minutes, None);
}

#[test]
fn test_engine_config_carries_values() {
    let config = AppConfig::load_from_str(VALID_CONFIG).unwrap();
    let engine = config.engine_config();
    assert_eq!(engine.buffer_capacity, 300);
    assert_eq!(engine.liveness.heartbeat_timeout_ms, 3000);
    assert_eq!(engine.rollup.retention_days, 7);
    assert_eq!(engine.snapshot.fallback_keep, 100);
    assert_eq!(engine.utc_offset.local_minus_utc(), 420 * 60);
}

#[test]
fn test_vacuum_schedule_prefers_cron() {
    let config = AppConfig::load_from_str(VALID_CONFIG).unwrap();
    assert!(matches!(
        config.vacuum_schedule(),
        VacuumSchedule::Every(d) if d == Duration::from_secs(86_400)
    ));

    let with_cron = VALID_CONFIG.replace(
        "path = \"data/rollup.db\"",
        "path = \"data/rollup.db\"\nvacuum_schedule = \"0 0 3 * * *\"",
    );
    let config = AppConfig::load_from_str(&with_cron).unwrap();
    assert!(matches!(config.vacuum_schedule(), VacuumSchedule::Cron(ref e) if e == "0 0 3 * * *"));
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    let bad = VALID_CONFIG.replace("port = 8081", "port = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.port"));
}

#[test]
fn test_config_validation_rejects_blank_initial_context() {
    let bad = VALID_CONFIG.replace("initial_context = \"meter-1\"", "initial_context = \"  \"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("source.initial_context"));
}

#[test]
fn test_config_validation_rejects_zero_capacity() {
    let bad = VALID_CONFIG.replace("capacity = 300", "capacity = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("buffer.capacity"));
}

#[test]
fn test_config_validation_rejects_fallback_above_capacity() {
    let bad = VALID_CONFIG.replace("capacity = 300", "capacity = 50");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("snapshot.fallback_keep"));
}

#[test]
fn test_config_validation_rejects_empty_rollup_path() {
    let bad = VALID_CONFIG.replace("path = \"data/rollup.db\"", "path = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("rollup.path"));
}

#[test]
fn test_config_validation_rejects_bad_cron() {
    let bad = VALID_CONFIG.replace(
        "path = \"data/rollup.db\"",
        "path = \"data/rollup.db\"\nvacuum_schedule = \"every night\"",
    );
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("rollup.vacuum_schedule"));
}

#[test]
fn test_config_validation_rejects_offset_out_of_range() {
    let bad = VALID_CONFIG.replace("utc_offset_minutes = 420", "utc_offset_minutes = 900");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("display.utc_offset_minutes"));
}

#[test]
fn test_config_validation_rejects_broadcast_capacity_zero() {
    let bad = VALID_CONFIG.replace("broadcast_capacity = 64", "broadcast_capacity = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("broadcast_capacity"));
}

#[test]
fn test_config_missing_section_fails_to_parse() {
    let bad = VALID_CONFIG.replace("[source]\ninitial_context = \"meter-1\"\n", "");
    assert!(AppConfig::load_from_str(&bad).is_err());
}
