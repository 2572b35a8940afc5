//! Tests for building queues from configuration

use gated_tasks::builders::{build_queue, build_queue_from_env, build_queues};
use gated_tasks::conditions::MutuallyExclusive;
use gated_tasks::config::{QueueConfig, SchedulerConfig};
use gated_tasks::core::Task;
use std::time::Duration;

#[test]
fn test_build_queue_owns_runtime() {
    let cfg = QueueConfig {
        name: "owned".into(),
        worker_threads: 1,
        ..QueueConfig::default()
    };
    let queue = build_queue(&cfg).unwrap();
    let task = Task::from_fn("on-owned-runtime", |_| async {
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok(())
    });

    queue.submit(&task).unwrap();
    assert!(task.wait_timeout(Duration::from_secs(5)));
    assert_eq!(queue.name(), "owned");
}

#[test]
fn test_build_queue_rejects_invalid_config() {
    let cfg = QueueConfig {
        worker_threads: 0,
        ..QueueConfig::default()
    };
    assert!(build_queue(&cfg).is_err());
}

#[test]
fn test_build_queue_from_env_uses_defaults() {
    let queue = build_queue_from_env().unwrap();
    assert!(queue.is_empty());
}

#[test]
fn test_build_queues_share_exclusivity() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let cfg = SchedulerConfig::from_json_str(r#"{"queues": {"ui": {}, "sync": {}}}"#).unwrap();
    let queues = build_queues(&cfg, rt.handle()).unwrap();

    let a = Task::from_fn("a", |_| async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(())
    });
    let b = Task::from_fn("b", |_| async { Ok(()) });
    a.add_condition(MutuallyExclusive::named("Shared")).unwrap();
    b.add_condition(MutuallyExclusive::named("Shared")).unwrap();

    queues["ui"].submit(&a).unwrap();
    queues["sync"].submit(&b).unwrap();

    assert!(b.dependencies().contains(&a));
    assert!(b.wait_timeout(Duration::from_secs(5)));
}
