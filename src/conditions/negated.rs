//! A condition that inverts another.

use async_trait::async_trait;

use crate::core::error::keys;
use crate::core::{Condition, ConditionResult, Task, TaskError};

/// Satisfied exactly when the wrapped condition fails, e.g. "only run when
/// the network is *not* reachable".
///
/// Inherits the wrapped condition's exclusivity and injected dependency.
#[derive(Debug)]
pub struct NegatedCondition<C> {
    inner: C,
    name: String,
}

impl<C: Condition> NegatedCondition<C> {
    /// Negate `inner`.
    pub fn new(inner: C) -> Self {
        let name = format!("Not<{}>", inner.name());
        Self { inner, name }
    }

    /// The wrapped condition.
    pub const fn inner(&self) -> &C {
        &self.inner
    }
}

#[async_trait]
impl<C: Condition> Condition for NegatedCondition<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_mutually_exclusive(&self) -> bool {
        self.inner.is_mutually_exclusive()
    }

    fn category(&self) -> &str {
        self.inner.category()
    }

    fn dependency_for(&self, task: &Task) -> Option<Task> {
        self.inner.dependency_for(task)
    }

    async fn evaluate_for(&self, task: &Task) -> ConditionResult {
        match self.inner.evaluate_for(task).await {
            ConditionResult::Satisfied => ConditionResult::Failed(
                TaskError::condition_failed(self.name.clone())
                    .with_info(keys::NEGATED_CONDITION, self.inner.name()),
            ),
            ConditionResult::Failed(_) => ConditionResult::Satisfied,
        }
    }
}
