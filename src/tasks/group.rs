//! A task that runs a set of child tasks and finishes after all of them.
//!
//! Children run on a private queue that stays suspended until the group
//! itself starts executing. A hidden "finishing" task depends on every
//! child, including children produced while the group runs; once it runs,
//! the group finishes with every child error, in child completion order.

use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::core::{
    QueueDelegate, SchedulerError, Task, TaskError, TaskQueue, TaskState, WeakTask, Work,
};

struct GroupState {
    queue: TaskQueue,
    finishing: Task,
    errors: Mutex<Vec<TaskError>>,
    owner: OnceLock<WeakTask>,
}

impl GroupState {
    fn owner(&self) -> Option<Task> {
        self.owner.get().and_then(WeakTask::upgrade)
    }
}

impl QueueDelegate for GroupState {
    fn will_submit(&self, _queue: &TaskQueue, task: &Task) {
        if *task == self.finishing {
            return;
        }
        if self.finishing.state() > TaskState::Pending {
            error!(
                group_queue = %self.queue.name(),
                task = %task.name(),
                "child added after the group started finishing"
            );
            debug_assert!(false, "child added after the group started finishing");
            return;
        }
        if let Err(err) = self.finishing.add_dependency(task) {
            error!(group_queue = %self.queue.name(), task = %task.name(), error = %err, "child not tracked by group");
        }
    }

    fn did_finish(&self, _queue: &TaskQueue, task: &Task, errors: &[TaskError]) {
        if *task == self.finishing {
            let aggregated = std::mem::take(&mut *self.errors.lock());
            debug!(group_queue = %self.queue.name(), errors = aggregated.len(), "group children finished");
            if let Some(owner) = self.owner() {
                owner.finish(aggregated);
            }
            return;
        }
        self.errors.lock().extend_from_slice(errors);
    }
}

struct GroupWork {
    state: Arc<GroupState>,
}

#[async_trait]
impl Work for GroupWork {
    async fn execute(&self, task: &Task) {
        if let Err(err) = self.state.queue.submit(&self.state.finishing) {
            error!(task_id = %task.id(), error = %err, "group finishing task not submitted");
            task.finish(vec![TaskError::execution_failed().with_source(err)]);
            return;
        }
        self.state.queue.set_suspended(false);
    }

    fn cancelled(&self, _task: &Task) {
        for child in self.state.queue.tasks() {
            if child != self.state.finishing {
                child.cancel();
            }
        }
        // Never-started groups skip execute, so the children must be released.
        self.state.queue.set_suspended(false);
    }
}

/// A task whose work is running child tasks.
///
/// ```rust,ignore
/// let group = GroupTask::new("sync", &queue, vec![fetch_a, fetch_b])?;
/// queue.submit(group.task())?;
/// group.task().finished().await;
/// ```
pub struct GroupTask {
    task: Task,
    state: Arc<GroupState>,
}

impl GroupTask {
    /// Create a group running `children` on a child queue of `queue`.
    ///
    /// # Errors
    ///
    /// Propagates submission errors of the children, e.g. a child that was
    /// already handed to another queue.
    pub fn new(
        name: impl Into<String>,
        queue: &TaskQueue,
        children: impl IntoIterator<Item = Task>,
    ) -> Result<Self, SchedulerError> {
        let name = name.into();
        let inner = queue.child_queue(format!("{name}.children"));
        inner.set_suspended(true);
        let state = Arc::new(GroupState {
            queue: inner,
            finishing: Task::plain(format!("{name}.finishing"), || async {}),
            errors: Mutex::new(Vec::new()),
            owner: OnceLock::new(),
        });
        let delegate: Arc<dyn QueueDelegate> = state.clone();
        state.queue.set_delegate(&delegate);

        let task = Task::new(
            name,
            GroupWork {
                state: Arc::clone(&state),
            },
        );
        let _ = state.owner.set(task.downgrade());

        let group = Self { task, state };
        for child in children {
            group.add_child(&child)?;
        }
        Ok(group)
    }

    /// Add a child. Valid until the group starts finishing; children
    /// added while the group executes extend its lifetime.
    ///
    /// # Errors
    ///
    /// Propagates the child's submission error.
    pub fn add_child(&self, child: &Task) -> Result<(), SchedulerError> {
        self.state.queue.submit(child)
    }

    /// The group's own task, to configure and submit like any other.
    #[must_use]
    pub const fn task(&self) -> &Task {
        &self.task
    }

    /// The queue children run on.
    #[must_use]
    pub fn children_queue(&self) -> &TaskQueue {
        &self.state.queue
    }
}

impl fmt::Debug for GroupTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupTask")
            .field("task", &self.task)
            .field("children", &self.state.queue.len())
            .finish()
    }
}
