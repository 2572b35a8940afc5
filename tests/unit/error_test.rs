//! Tests for task and scheduler error types

use gated_tasks::core::error::keys;
use gated_tasks::core::{ErrorCode, SchedulerError, Task, TaskError};

#[derive(Debug, thiserror::Error)]
#[error("service unavailable")]
struct Unavailable;

#[test]
fn test_error_code_serializes_snake_case() {
    let json = serde_json::to_string(&ErrorCode::ConditionFailed).unwrap();
    assert_eq!(json, "\"condition_failed\"");
    let code: ErrorCode = serde_json::from_str("\"execution_failed\"").unwrap();
    assert_eq!(code, ErrorCode::ExecutionFailed);
}

#[test]
fn test_info_fields_render_in_display() {
    let err = TaskError::execution_failed()
        .with_info(keys::TIMEOUT_MS, 50)
        .with_info(keys::REASON, "slow");
    assert_eq!(
        err.to_string(),
        "execution failed (reason=\"slow\", timeout_ms=50)"
    );
    assert_eq!(err.info().len(), 2);
}

#[test]
fn test_source_chain_preserved() {
    let err = TaskError::condition_failed("Reachable").with_source(Unavailable);
    let cloned = err.clone();
    assert_eq!(
        cloned.underlying().map(ToString::to_string).as_deref(),
        Some("service unavailable")
    );
}

#[test]
fn test_scheduler_error_messages_name_the_task() {
    let task = Task::from_fn("t", |_| async { Ok(()) });
    let id = task.id().to_string();

    assert!(SchedulerError::AlreadySubmitted(task.id())
        .to_string()
        .contains(&id));
    assert!(SchedulerError::SelfDependency(task.id())
        .to_string()
        .contains(&id));
    assert_eq!(
        SchedulerError::UnexpectedSignal("push".into()).to_string(),
        "signal `push` delivered without an outstanding request"
    );
}

#[test]
fn test_self_dependency_rejected() {
    let task = Task::from_fn("loop", |_| async { Ok(()) });
    assert!(matches!(
        task.add_dependency(&task),
        Err(SchedulerError::SelfDependency(_))
    ));
}

#[test]
fn test_cycle_rejected() {
    let a = Task::from_fn("a", |_| async { Ok(()) });
    let b = Task::from_fn("b", |_| async { Ok(()) });
    let c = Task::from_fn("c", |_| async { Ok(()) });
    b.add_dependency(&a).unwrap();
    c.add_dependency(&b).unwrap();

    assert!(matches!(
        a.add_dependency(&c),
        Err(SchedulerError::DependencyCycle { task, dependency }) if task == a.id() && dependency == c.id()
    ));
}
