//! Core scheduling abstractions: tasks, conditions, observers, exclusivity
//! and the queue that wires them together.

pub mod audit;
pub mod condition;
pub mod error;
pub mod exclusivity;
pub mod observer;
pub mod queue;
pub mod task;

pub use audit::{
    build_audit_event, AuditAction, AuditEvent, AuditObserver, AuditSink, InMemoryAuditSink,
};
pub use condition::{Condition, ConditionResult};
pub use error::{AppResult, ErrorCode, SchedulerError, TaskError, UnderlyingError};
pub use exclusivity::ExclusivityController;
pub use observer::{BlockObserver, Observer};
pub use queue::{QueueDelegate, QueueOptions, TaskQueue};
pub use task::{Task, TaskId, TaskState, WeakTask, Work};
