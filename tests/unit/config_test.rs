//! Tests for configuration validation and loading

use gated_tasks::config::{QueueConfig, SchedulerConfig};
use std::collections::HashMap;
use std::time::Duration;

fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn test_default_config_is_valid() {
    let cfg = QueueConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.name, "default");
    assert!(cfg.worker_threads >= 1);
}

#[test]
fn test_zero_worker_threads_invalid() {
    let cfg = QueueConfig {
        worker_threads: 0,
        ..QueueConfig::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_limits_invalid() {
    let no_concurrency = QueueConfig {
        max_concurrent_tasks: Some(0),
        ..QueueConfig::default()
    };
    let no_timeout = QueueConfig {
        default_timeout_ms: Some(0),
        ..QueueConfig::default()
    };
    assert!(no_concurrency.validate().is_err());
    assert!(no_timeout.validate().is_err());
}

#[test]
fn test_from_json_fills_defaults() {
    let cfg = QueueConfig::from_json_str(r#"{"default_timeout_ms": 250}"#).unwrap();
    assert_eq!(cfg.name, "default");
    assert_eq!(cfg.max_concurrent_tasks, None);
    assert_eq!(cfg.options().default_timeout, Some(Duration::from_millis(250)));
}

#[test]
fn test_from_json_rejects_garbage() {
    let err = QueueConfig::from_json_str("{not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_from_lookup_reads_prefixed_vars() {
    let cfg = QueueConfig::from_lookup(lookup(&[
        ("GATED_TASKS_QUEUE_NAME", "ui"),
        ("GATED_TASKS_WORKER_THREADS", "3"),
        ("GATED_TASKS_MAX_CONCURRENT_TASKS", "1"),
        ("GATED_TASKS_DEFAULT_TIMEOUT_MS", " 1500 "),
    ]))
    .unwrap();

    assert_eq!(cfg.name, "ui");
    assert_eq!(cfg.worker_threads, 3);
    let options = cfg.options();
    assert_eq!(options.max_concurrent_tasks, Some(1));
    assert_eq!(options.default_timeout, Some(Duration::from_millis(1500)));
}

#[test]
fn test_from_lookup_reports_bad_number() {
    let err = QueueConfig::from_lookup(lookup(&[("GATED_TASKS_WORKER_THREADS", "many")]))
        .unwrap_err();
    assert!(err.contains("GATED_TASKS_WORKER_THREADS"));
}

#[test]
fn test_scheduler_config_requires_queues() {
    let empty = SchedulerConfig {
        queues: HashMap::new(),
    };
    assert!(empty.validate().is_err());

    let cfg = SchedulerConfig::from_json_str(
        r#"{"queues": {"ui": {"worker_threads": 1}, "sync": {"max_concurrent_tasks": 4}}}"#,
    )
    .unwrap();
    assert_eq!(cfg.queues.len(), 2);
    assert_eq!(cfg.queues["sync"].max_concurrent_tasks, Some(4));
}

#[test]
fn test_scheduler_config_names_invalid_queue() {
    let err = SchedulerConfig::from_json_str(r#"{"queues": {"broken": {"worker_threads": 0}}}"#)
        .unwrap_err();
    assert!(err.contains("broken"));
}
