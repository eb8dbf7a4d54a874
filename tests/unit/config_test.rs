//! Tests for configuration validation

use std::time::Duration;

use oddjob::SchedulerConfig;

#[test]
fn test_scheduler_config_validation() {
    let valid = SchedulerConfig::new()
        .with_total_capacity(4)
        .with_max_queue_depth(50)
        .with_sweep_interval(Duration::from_secs(5));
    assert!(valid.validate().is_ok());
}

#[test]
fn test_scheduler_config_invalid_capacity() {
    let invalid = SchedulerConfig::new().with_total_capacity(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_invalid_queue_depth() {
    let invalid = SchedulerConfig::new().with_max_queue_depth(0);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_too_few_workers() {
    let invalid = SchedulerConfig::new()
        .with_total_capacity(4)
        .with_worker_count(2);
    let err = invalid.validate().unwrap_err();
    assert!(err.contains("worker_count"));
}

#[test]
fn test_scheduler_config_invalid_sweep_interval() {
    let invalid = SchedulerConfig::new().with_sweep_interval(Duration::ZERO);
    assert!(invalid.validate().is_err());
}

#[test]
fn test_scheduler_config_from_json() {
    let json = r#"{
        "total_capacity": 8,
        "max_queue_depth": 500,
        "sweep_interval_ms": 1000,
        "id_counter_path": "/var/lib/oddjob/counter"
    }"#;

    let config = SchedulerConfig::from_json_str(json).unwrap();
    assert_eq!(config.total_capacity, 8);
    assert_eq!(config.effective_worker_count(), 8);
    assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    assert_eq!(config.poll_interval_ms, 50);
    assert!(config.id_counter_path.is_some());
}

#[test]
fn test_scheduler_config_from_json_rejects_invalid() {
    assert!(SchedulerConfig::from_json_str(r#"{"total_capacity": 0}"#).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_scheduler_config_from_vars() {
    let config = SchedulerConfig::from_vars([
        ("ODDJOB_TOTAL_CAPACITY".to_string(), "2".to_string()),
        ("ODDJOB_WORKER_COUNT".to_string(), "4".to_string()),
        ("ODDJOB_POLL_INTERVAL_MS".to_string(), "20".to_string()),
    ])
    .unwrap();
    assert_eq!(config.total_capacity, 2);
    assert_eq!(config.effective_worker_count(), 4);
    assert_eq!(config.poll_interval(), Duration::from_millis(20));
}

#[test]
fn test_scheduler_config_from_vars_invalid_combination() {
    let result = SchedulerConfig::from_vars([
        ("ODDJOB_TOTAL_CAPACITY".to_string(), "4".to_string()),
        ("ODDJOB_WORKER_COUNT".to_string(), "1".to_string()),
    ]);
    assert!(result.is_err());
}
