//! A condition whose only purpose is to serialize tasks.

use async_trait::async_trait;

use crate::core::{Condition, ConditionResult, Task};

/// Always satisfied; marks the task as exclusive within a category.
///
/// `MutuallyExclusive::of::<Dialog>()` keeps two dialog-presenting tasks from
/// running at once; `MutuallyExclusive::named("db-migration")` does the same
/// for an arbitrary string category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutuallyExclusive {
    category: String,
}

impl MutuallyExclusive {
    /// Exclusive category keyed by the type `T`.
    #[must_use]
    pub fn of<T: ?Sized>() -> Self {
        Self::named(format!("MutuallyExclusive<{}>", std::any::type_name::<T>()))
    }

    /// Exclusive category with an explicit name.
    #[must_use]
    pub fn named(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
        }
    }
}

#[async_trait]
impl Condition for MutuallyExclusive {
    fn name(&self) -> &str {
        &self.category
    }

    fn is_mutually_exclusive(&self) -> bool {
        true
    }

    async fn evaluate_for(&self, _task: &Task) -> ConditionResult {
        ConditionResult::Satisfied
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dialog;

    #[test]
    fn test_type_keyed_category() {
        let condition = MutuallyExclusive::of::<Dialog>();
        assert!(condition.category().starts_with("MutuallyExclusive<"));
        assert!(condition.category().ends_with("Dialog>"));
        assert_eq!(condition, MutuallyExclusive::of::<Dialog>());
        assert_ne!(condition, MutuallyExclusive::of::<str>());
    }

    #[tokio::test]
    async fn test_always_satisfied() {
        let task = Task::from_fn("t", |_| async { Ok(()) });
        assert!(MutuallyExclusive::named("X")
            .evaluate_for(&task)
            .await
            .is_satisfied());
    }
}
