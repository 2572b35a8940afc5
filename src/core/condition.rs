//! Conditions gate a task's execution.
//!
//! A [`Condition`] is evaluated asynchronously once every dependency of the
//! task has finished. Conditions may inject a setup task through
//! [`Condition::dependency_for`] and may ask to be serialized against every
//! other task carrying a condition of the same exclusivity category.

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;

use super::error::{keys, TaskError};
use super::task::{panic_message, Task};

/// Outcome of a single condition evaluation.
#[derive(Debug, Clone)]
pub enum ConditionResult {
    /// The task may proceed.
    Satisfied,
    /// The task must not run; the error is added to its error list.
    Failed(TaskError),
}

impl ConditionResult {
    /// Whether the condition was satisfied.
    #[must_use]
    pub const fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }

    /// The failure error, if any.
    #[must_use]
    pub fn into_error(self) -> Option<TaskError> {
        match self {
            Self::Satisfied => None,
            Self::Failed(error) => Some(error),
        }
    }
}

/// A predicate evaluated before a task may execute.
///
/// Implementations may perform arbitrary asynchronous work inside
/// [`evaluate_for`](Condition::evaluate_for), such as prompting for a
/// permission or calling a service.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use gated_tasks::core::{Condition, ConditionResult, Task, TaskError};
///
/// struct Reachable { host: String }
///
/// #[async_trait]
/// impl Condition for Reachable {
///     fn name(&self) -> &str { "Reachable" }
///
///     async fn evaluate_for(&self, _task: &Task) -> ConditionResult {
///         if ping(&self.host).await {
///             ConditionResult::Satisfied
///         } else {
///             ConditionResult::Failed(TaskError::condition_failed(self.name()))
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Condition: Send + Sync + 'static {
    /// Stable identifier used in diagnostics and failure errors.
    fn name(&self) -> &str;

    /// Whether tasks holding this condition run one at a time per category.
    fn is_mutually_exclusive(&self) -> bool {
        false
    }

    /// Exclusivity category. Defaults to the condition name.
    fn category(&self) -> &str {
        self.name()
    }

    /// Optional task that must finish before evaluation. Queried once, when
    /// the owning task is submitted.
    fn dependency_for(&self, _task: &Task) -> Option<Task> {
        None
    }

    /// Decide whether `task` may run.
    async fn evaluate_for(&self, task: &Task) -> ConditionResult;
}

/// Evaluate every condition of `task` concurrently and collect the failures.
///
/// All conditions run to completion even when one fails early, since some
/// carry side effects a caller may rely on. A panicking condition counts as
/// failed.
pub(crate) async fn evaluate_all(task: &Task) -> Vec<TaskError> {
    let conditions = task.conditions();
    if conditions.is_empty() {
        return Vec::new();
    }

    let evaluations = conditions.iter().map(|condition| async move {
        match AssertUnwindSafe(condition.evaluate_for(task))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(task_id = %task.id(), condition = condition.name(), panic = %message, "condition panicked");
                ConditionResult::Failed(
                    TaskError::condition_failed(condition.name()).with_info(keys::PANIC, message),
                )
            }
        }
    });

    join_all(evaluations)
        .await
        .into_iter()
        .filter_map(ConditionResult::into_error)
        .collect()
}
