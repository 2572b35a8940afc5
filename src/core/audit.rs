//! Lifecycle audit trail.
//!
//! [`AuditObserver`] turns a task's start/produce/finish callbacks into
//! [`AuditEvent`]s recorded by an [`AuditSink`]. The in-memory sink keeps a
//! bounded buffer and is what tests use to check ordering guarantees.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::error::TaskError;
use super::observer::Observer;
use super::task::Task;
use crate::util::clock::now_ms;

/// Lifecycle action captured by an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// User work is about to execute.
    Start,
    /// The task produced a follow-up task.
    Produce,
    /// The task finished.
    Finish,
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Related task identifier.
    pub task_id: String,
    /// Related task name.
    pub task: String,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Number of errors at finish, zero otherwise.
    pub error_count: usize,
    /// Additional context, such as the produced task's name.
    pub payload: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Helper to build an audit event for `task`, stamped with the current time.
#[must_use]
pub fn build_audit_event(
    task: &Task,
    action: AuditAction,
    error_count: usize,
    payload: Option<String>,
) -> AuditEvent {
    AuditEvent {
        task_id: task.id().to_string(),
        task: task.name().to_string(),
        action,
        created_at_ms: now_ms(),
        error_count,
        payload,
    }
}

/// Observer recording every lifecycle callback into a shared sink.
///
/// One sink can be shared by many observers, giving a single ordered trail
/// across tasks.
#[derive(Clone)]
pub struct AuditObserver {
    sink: Arc<Mutex<dyn AuditSink>>,
}

impl AuditObserver {
    /// Record into `sink`.
    #[must_use]
    pub fn new(sink: Arc<Mutex<dyn AuditSink>>) -> Self {
        Self { sink }
    }
}

impl Observer for AuditObserver {
    fn on_start(&self, task: &Task) {
        self.sink
            .lock()
            .record(build_audit_event(task, AuditAction::Start, 0, None));
    }

    fn on_produce(&self, task: &Task, produced: &Task) {
        self.sink.lock().record(build_audit_event(
            task,
            AuditAction::Produce,
            0,
            Some(produced.name().to_string()),
        ));
    }

    fn on_finish(&self, task: &Task, errors: &[TaskError]) {
        self.sink
            .lock()
            .record(build_audit_event(task, AuditAction::Finish, errors.len(), None));
    }
}
