//! Tests for the audit trail

use gated_tasks::core::{
    build_audit_event, AuditAction, AuditObserver, AuditSink, InMemoryAuditSink, Observer, Task,
};
use parking_lot::Mutex;
use std::sync::Arc;

#[test]
fn test_audit_event_serializes() {
    let task = Task::from_fn("audited", |_| async { Ok(()) });
    let event = build_audit_event(&task, AuditAction::Produce, 0, Some("child".into()));
    let json = serde_json::to_value(&event).unwrap();

    assert_eq!(json["task"], "audited");
    assert_eq!(json["action"], "produce");
    assert_eq!(json["payload"], "child");
    assert_eq!(json["task_id"], task.id().to_string());
}

#[test]
fn test_observer_records_in_callback_order() {
    let sink = Arc::new(Mutex::new(InMemoryAuditSink::new(8)));
    let shared: Arc<Mutex<dyn AuditSink>> = sink.clone();
    let observer = AuditObserver::new(shared);
    let parent = Task::from_fn("parent", |_| async { Ok(()) });
    let child = Task::from_fn("child", |_| async { Ok(()) });

    observer.on_start(&parent);
    observer.on_produce(&parent, &child);
    observer.on_finish(&parent, &[]);

    let actions: Vec<AuditAction> = sink.lock().events().iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![AuditAction::Start, AuditAction::Produce, AuditAction::Finish]
    );
}

#[test]
fn test_zero_capacity_sink_records_nothing() {
    let mut sink = InMemoryAuditSink::new(0);
    let task = Task::from_fn("t", |_| async { Ok(()) });
    sink.record(build_audit_event(&task, AuditAction::Start, 0, None));
    assert!(sink.events().is_empty());
}
