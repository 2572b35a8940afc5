//! Error types for tasks and scheduler operations.
//!
//! Two families live here:
//!
//! - [`TaskError`] is what a task accumulates while its conditions are
//!   evaluated or its work runs. It never crosses task boundaries on its own;
//!   observers and group tasks collect it explicitly.
//! - [`SchedulerError`] reports misuse of the scheduling API (submitting twice,
//!   wiring a dependency cycle, ...) back to the caller that attempted it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::task::TaskId;

/// Well-known auxiliary field names carried in [`TaskError::info`].
pub mod keys {
    /// Name of the condition that reported the failure.
    pub const CONDITION: &str = "condition";
    /// Name of the condition wrapped by a negation.
    pub const NEGATED_CONDITION: &str = "negated_condition";
    /// Identifiers of dependencies that finished cancelled.
    pub const CANCELLED_DEPENDENCIES: &str = "cancelled_dependencies";
    /// Timeout bound, in milliseconds, that expired.
    pub const TIMEOUT_MS: &str = "timeout_ms";
    /// Message of a panic caught while running user code.
    pub const PANIC: &str = "panic";
    /// Human readable reason attached by user work.
    pub const REASON: &str = "reason";
}

/// Discriminated kind of a [`TaskError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// A named condition reported that it is not satisfied.
    ConditionFailed,
    /// User work, or a derived mechanism such as a timeout, reported failure.
    ExecutionFailed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConditionFailed => write!(f, "condition failed"),
            Self::ExecutionFailed => write!(f, "execution failed"),
        }
    }
}

/// Shared, type-erased underlying error from an external collaborator.
pub type UnderlyingError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// An error produced by a task's conditions or work.
///
/// Carries a [`ErrorCode`] plus a map of named auxiliary fields used for
/// diagnostics. Errors from external services are wrapped as `source`.
#[derive(Debug, Clone, Error)]
#[error("{code}{}", describe(.info))]
pub struct TaskError {
    code: ErrorCode,
    info: BTreeMap<String, serde_json::Value>,
    #[source]
    source: Option<UnderlyingError>,
}

fn describe(info: &BTreeMap<String, serde_json::Value>) -> String {
    if info.is_empty() {
        return String::new();
    }
    let fields: Vec<String> = info.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!(" ({})", fields.join(", "))
}

impl TaskError {
    /// Create an error with the given code and no auxiliary fields.
    #[must_use]
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            info: BTreeMap::new(),
            source: None,
        }
    }

    /// A `ConditionFailed` error naming the condition that failed.
    #[must_use]
    pub fn condition_failed(condition: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConditionFailed).with_info(keys::CONDITION, condition.into())
    }

    /// An `ExecutionFailed` error with no context.
    #[must_use]
    pub fn execution_failed() -> Self {
        Self::new(ErrorCode::ExecutionFailed)
    }

    /// Attach a named auxiliary field.
    #[must_use]
    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.info.insert(key.into(), value.into());
        self
    }

    /// Wrap an underlying collaborator error.
    #[must_use]
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Wrap an already shared underlying error.
    #[must_use]
    pub fn with_shared_source(mut self, source: UnderlyingError) -> Self {
        self.source = Some(source);
        self
    }

    /// Discriminated kind.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// All auxiliary fields.
    #[must_use]
    pub const fn info(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.info
    }

    /// A single auxiliary field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.info.get(key)
    }

    /// Name of the failed condition, if this is a condition failure.
    #[must_use]
    pub fn condition(&self) -> Option<&str> {
        self.get(keys::CONDITION).and_then(serde_json::Value::as_str)
    }

    /// The wrapped collaborator error, if any.
    #[must_use]
    pub fn underlying(&self) -> Option<&UnderlyingError> {
        self.source.as_ref()
    }
}

/// Errors produced by misuse of the scheduling API.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The task was already handed to a queue.
    #[error("task {0} was already submitted")]
    AlreadySubmitted(TaskId),
    /// The operation is not valid in the task's current lifecycle state.
    #[error("task {task} cannot {action} in state {state}")]
    InvalidState {
        /// Offending task.
        task: TaskId,
        /// What was attempted.
        action: &'static str,
        /// Lifecycle state at the time.
        state: String,
    },
    /// A task was made dependent on itself.
    #[error("task {0} cannot depend on itself")]
    SelfDependency(TaskId),
    /// Adding the dependency would close a cycle.
    #[error("dependency {dependency} -> {task} would create a cycle")]
    DependencyCycle {
        /// Task that would gain the dependency.
        task: TaskId,
        /// The dependency that already (transitively) depends on `task`.
        dependency: TaskId,
    },
    /// Plain units of work do not take conditions.
    #[error("plain task {0} does not accept conditions")]
    PlainTask(TaskId),
    /// An external signal was delivered with no request outstanding.
    #[error("signal `{0}` delivered without an outstanding request")]
    UnexpectedSignal(String),
    /// Runtime or configuration failure with context.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
