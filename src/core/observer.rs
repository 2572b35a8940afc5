//! Lifecycle observers.
//!
//! Observers are invoked synchronously by the scheduler, in registration
//! order: `on_start` before any `on_produce`, and both before `on_finish`.
//! They run on whichever worker thread drove the transition and must not
//! block; work that needs a particular thread has to redispatch itself.

use super::error::TaskError;
use super::task::Task;

/// Listener for a task's significant lifecycle events.
pub trait Observer: Send + Sync + 'static {
    /// Invoked immediately before the task's work executes.
    fn on_start(&self, _task: &Task) {}

    /// Invoked when the task calls [`Task::produce`].
    fn on_produce(&self, _task: &Task, _produced: &Task) {}

    /// Invoked as the task finishes, with every error it accumulated.
    fn on_finish(&self, _task: &Task, _errors: &[TaskError]) {}
}

type StartHandler = Box<dyn Fn(&Task) + Send + Sync>;
type ProduceHandler = Box<dyn Fn(&Task, &Task) + Send + Sync>;
type FinishHandler = Box<dyn Fn(&Task, &[TaskError]) + Send + Sync>;

/// An observer built from closures, for ad-hoc lifecycle hooks.
///
/// ```rust,ignore
/// let observer = BlockObserver::new()
///     .on_start(|task| tracing::info!(task = task.name(), "started"))
///     .on_finish(|task, errors| report(task, errors));
/// task.add_observer(observer)?;
/// ```
#[derive(Default)]
pub struct BlockObserver {
    start: Option<StartHandler>,
    produce: Option<ProduceHandler>,
    finish: Option<FinishHandler>,
}

impl BlockObserver {
    /// An observer with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An observer that only reacts to finishing.
    #[must_use]
    pub fn finishing(handler: impl Fn(&Task, &[TaskError]) + Send + Sync + 'static) -> Self {
        Self::new().on_finish(handler)
    }

    /// Set the start handler.
    #[must_use]
    pub fn on_start(mut self, handler: impl Fn(&Task) + Send + Sync + 'static) -> Self {
        self.start = Some(Box::new(handler));
        self
    }

    /// Set the produce handler.
    #[must_use]
    pub fn on_produce(mut self, handler: impl Fn(&Task, &Task) + Send + Sync + 'static) -> Self {
        self.produce = Some(Box::new(handler));
        self
    }

    /// Set the finish handler.
    #[must_use]
    pub fn on_finish(
        mut self,
        handler: impl Fn(&Task, &[TaskError]) + Send + Sync + 'static,
    ) -> Self {
        self.finish = Some(Box::new(handler));
        self
    }
}

impl Observer for BlockObserver {
    fn on_start(&self, task: &Task) {
        if let Some(handler) = &self.start {
            handler(task);
        }
    }

    fn on_produce(&self, task: &Task, produced: &Task) {
        if let Some(handler) = &self.produce {
            handler(task, produced);
        }
    }

    fn on_finish(&self, task: &Task, errors: &[TaskError]) {
        if let Some(handler) = &self.finish {
            handler(task, errors);
        }
    }
}

impl std::fmt::Debug for BlockObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockObserver")
            .field("start", &self.start.is_some())
            .field("produce", &self.produce.is_some())
            .field("finish", &self.finish.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_only_configured_handlers_fire() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&seen);
        let observer = BlockObserver::finishing(move |task, errors| {
            log.lock().push(format!("{}:{}", task.name(), errors.len()));
        });

        let task = Task::from_fn("observed", |_| async { Ok(()) });
        Observer::on_start(&observer, &task);
        Observer::on_produce(&observer, &task, &task);
        Observer::on_finish(&observer, &task, &[TaskError::execution_failed()]);

        assert_eq!(*seen.lock(), vec!["observed:1".to_string()]);
    }

    #[test]
    fn test_produce_handler_receives_both_tasks() {
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        let observer = BlockObserver::new().on_produce(move |parent, child| {
            *slot.lock() = Some((parent.name().to_string(), child.name().to_string()));
        });

        let parent = Task::from_fn("parent", |_| async { Ok(()) });
        let child = Task::from_fn("child", |_| async { Ok(()) });
        Observer::on_produce(&observer, &parent, &child);

        assert_eq!(
            seen.lock().clone(),
            Some(("parent".to_string(), "child".to_string()))
        );
    }
}
