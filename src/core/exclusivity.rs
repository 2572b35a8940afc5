//! Mutual exclusivity between tasks sharing a category.
//!
//! The controller keeps, per category name, the ordered list of tasks
//! currently registered. A newly registered task is made dependent on every
//! unfinished occupant of each of its categories, so at most one of them
//! executes at a time even when an earlier occupant is cancelled and leaves
//! the category early. Tasks in different categories stay fully concurrent.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::error::TaskError;
use super::observer::Observer;
use super::task::{Task, TaskId};

/// Registry of exclusivity categories.
///
/// One controller is normally shared by every queue of an application; each
/// test can construct its own.
#[derive(Debug, Default)]
pub struct ExclusivityController {
    categories: Mutex<HashMap<String, Vec<Task>>>,
}

impl ExclusivityController {
    /// Create an empty controller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` under every category, chaining it behind each
    /// unfinished occupant. An edge that would close a dependency cycle is
    /// skipped; the reverse path already orders the two tasks. The whole
    /// registration happens under one lock.
    pub fn register(&self, task: &Task, categories: &[String]) {
        let mut map = self.categories.lock();
        for category in categories {
            let occupants = map.entry(category.clone()).or_default();
            for previous in occupants.iter().filter(|occupant| !occupant.is_finished()) {
                match task.add_dependency(previous) {
                    Ok(()) => debug!(
                        task_id = %task.id(),
                        previous = %previous.id(),
                        category = %category,
                        "task chained behind exclusive occupant"
                    ),
                    Err(err) => warn!(
                        task_id = %task.id(),
                        previous = %previous.id(),
                        category = %category,
                        error = %err,
                        "could not chain exclusive task"
                    ),
                }
            }
            occupants.push(task.clone());
        }
    }

    /// Remove `task` from every category it occupies.
    pub fn deregister(&self, task: &Task, categories: &[String]) {
        let mut map = self.categories.lock();
        for category in categories {
            if let Some(occupants) = map.get_mut(category) {
                occupants.retain(|occupant| occupant != task);
                if occupants.is_empty() {
                    map.remove(category);
                }
            }
        }
        debug!(task_id = %task.id(), "task released exclusivity categories");
    }

    /// Identifiers of the tasks currently registered under `category`, in
    /// registration order.
    #[must_use]
    pub fn occupants(&self, category: &str) -> Vec<TaskId> {
        self.categories
            .lock()
            .get(category)
            .map(|occupants| occupants.iter().map(Task::id).collect())
            .unwrap_or_default()
    }

    /// Whether no category currently has occupants.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.categories.lock().is_empty()
    }
}

/// Releases a task's categories once it finishes.
pub(crate) struct ExclusivityRelease {
    pub(crate) controller: std::sync::Arc<ExclusivityController>,
    pub(crate) categories: Vec<String>,
}

impl Observer for ExclusivityRelease {
    fn on_finish(&self, task: &Task, _errors: &[TaskError]) {
        self.controller.deregister(task, &self.categories);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str) -> Task {
        Task::from_fn(name, |_| async { Ok(()) })
    }

    fn category(name: &str) -> Vec<String> {
        vec![name.to_string()]
    }

    #[test]
    fn test_second_task_chained_behind_first() {
        let controller = ExclusivityController::new();
        let a = task("a");
        let b = task("b");

        controller.register(&a, &category("X"));
        controller.register(&b, &category("X"));

        assert!(b.dependencies().contains(&a));
        assert!(a.dependencies().is_empty());
        assert_eq!(controller.occupants("X"), vec![a.id(), b.id()]);
    }

    #[test]
    fn test_different_categories_stay_independent() {
        let controller = ExclusivityController::new();
        let a = task("a");
        let b = task("b");

        controller.register(&a, &category("X"));
        controller.register(&b, &category("Y"));

        assert!(b.dependencies().is_empty());
    }

    #[test]
    fn test_deregister_clears_empty_categories() {
        let controller = ExclusivityController::new();
        let a = task("a");
        let b = task("b");
        controller.register(&a, &category("X"));
        controller.register(&b, &category("X"));

        controller.deregister(&a, &category("X"));
        assert_eq!(controller.occupants("X"), vec![b.id()]);

        controller.deregister(&b, &category("X"));
        assert!(controller.is_empty());
    }

    #[test]
    fn test_chain_skipped_when_it_would_cycle() {
        let controller = ExclusivityController::new();
        let a = task("a");
        let b = task("b");
        // a already waits on b, so b must not be chained behind a.
        a.add_dependency(&b).unwrap();

        controller.register(&a, &category("X"));
        controller.register(&b, &category("X"));

        assert!(b.dependencies().is_empty());
        assert_eq!(controller.occupants("X").len(), 2);
    }

    #[test]
    fn test_third_task_waits_on_every_occupant() {
        let controller = ExclusivityController::new();
        let a = task("a");
        let b = task("b");
        let c = task("c");

        controller.register(&a, &category("X"));
        controller.register(&b, &category("X"));
        controller.register(&c, &category("X"));

        let deps = c.dependencies();
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(&a));
        assert!(deps.contains(&b));
    }

    #[test]
    fn test_finished_occupant_not_chained() {
        let controller = ExclusivityController::new();
        let a = task("a");
        let b = task("b");
        let c = task("c");
        controller.register(&a, &category("X"));
        controller.register(&b, &category("X"));
        // cancelled while pending, still listed until its release observer runs
        b.cancel();

        controller.register(&c, &category("X"));

        assert_eq!(c.dependencies(), vec![a.clone()]);
    }

    #[test]
    fn test_skipped_chain_still_orders_later_tasks() {
        let controller = ExclusivityController::new();
        let a = task("a");
        let b = task("b");
        let c = task("c");
        a.add_dependency(&b).unwrap();
        controller.register(&a, &category("X"));
        controller.register(&b, &category("X"));

        controller.register(&c, &category("X"));

        let deps = c.dependencies();
        assert!(deps.contains(&a));
        assert!(deps.contains(&b));
    }

    #[test]
    fn test_release_observer_deregisters_on_finish() {
        let controller = std::sync::Arc::new(ExclusivityController::new());
        let a = task("a");
        controller.register(&a, &category("X"));
        a.add_observer(ExclusivityRelease {
            controller: std::sync::Arc::clone(&controller),
            categories: category("X"),
        })
        .unwrap();

        a.finish_ok();
        assert!(controller.is_empty());
    }
}
