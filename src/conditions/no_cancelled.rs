//! A condition requiring that no dependency was cancelled.

use async_trait::async_trait;

use crate::core::error::keys;
use crate::core::{Condition, ConditionResult, Task, TaskError};

/// Fails if any dependency of the task finished cancelled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCancelledDependencies;

impl NoCancelledDependencies {
    /// Condition name.
    pub const NAME: &'static str = "NoCancelledDependencies";

    /// Create the condition.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Condition for NoCancelledDependencies {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn evaluate_for(&self, task: &Task) -> ConditionResult {
        let cancelled: Vec<String> = task
            .dependencies()
            .iter()
            .filter(|dependency| dependency.is_cancelled())
            .map(|dependency| dependency.id().to_string())
            .collect();

        if cancelled.is_empty() {
            ConditionResult::Satisfied
        } else {
            ConditionResult::Failed(
                TaskError::condition_failed(Self::NAME)
                    .with_info(keys::CANCELLED_DEPENDENCIES, cancelled),
            )
        }
    }
}
