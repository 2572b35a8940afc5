//! The task queue: wires conditions, exclusivity and observers around every
//! submitted task, then hands its driver to the runtime.
//!
//! # Submission
//!
//! For a managed task, [`TaskQueue::submit`]:
//!
//! 1. attaches an observer that resubmits produced tasks to this queue and
//!    reports finishes to the [`QueueDelegate`],
//! 2. asks each condition for an injected dependency, wires it as a real
//!    dependency and submits it,
//! 3. registers the task's exclusivity categories with the
//!    [`ExclusivityController`] and arranges for them to be released,
//! 4. moves the task to `Pending` and calls `will_submit`,
//! 5. spawns the task's driver (or parks it while the queue is suspended).
//!
//! Plain tasks skip steps 2 and 3.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::error::{keys, SchedulerError, TaskError};
use super::exclusivity::{ExclusivityController, ExclusivityRelease};
use super::observer::Observer;
use super::task::{Task, TaskId, TaskState};
use crate::observers::TimeoutObserver;
use crate::runtime::Spawn;

/// Receives queue-wide lifecycle events.
///
/// Usually an [`Observer`] is the better fit. A delegate sees every task of
/// one queue, which is what container tasks need to track their children.
pub trait QueueDelegate: Send + Sync + 'static {
    /// Called before the runtime sees `task`.
    fn will_submit(&self, _queue: &TaskQueue, _task: &Task) {}

    /// Called once per task, after the task's own observers ran.
    fn did_finish(&self, _queue: &TaskQueue, _task: &Task, _errors: &[TaskError]) {}
}

/// Tuning knobs applied to every task a queue accepts.
#[derive(Debug, Clone, Default)]
pub struct QueueOptions {
    /// Upper bound on tasks past their dependencies at once.
    pub max_concurrent_tasks: Option<usize>,
    /// Timeout attached to every managed task.
    pub default_timeout: Option<Duration>,
}

struct QueueShared {
    name: String,
    spawner: Arc<dyn Spawn>,
    exclusivity: Arc<ExclusivityController>,
    options: QueueOptions,
    limiter: Option<Arc<Semaphore>>,
    delegate: RwLock<Option<Weak<dyn QueueDelegate>>>,
    /// `Some` while suspended: drivers parked until resumed.
    parked: Mutex<Option<Vec<Task>>>,
    live: Mutex<HashMap<TaskId, Task>>,
}

/// Scheduler front-end. Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<QueueShared>,
}

impl TaskQueue {
    /// Create a queue running drivers on `spawner` and serializing
    /// exclusive tasks through `exclusivity`.
    pub fn new(
        name: impl Into<String>,
        spawner: Arc<dyn Spawn>,
        exclusivity: Arc<ExclusivityController>,
    ) -> Self {
        Self::with_options(name, spawner, exclusivity, QueueOptions::default())
    }

    /// Like [`TaskQueue::new`] with explicit options.
    pub fn with_options(
        name: impl Into<String>,
        spawner: Arc<dyn Spawn>,
        exclusivity: Arc<ExclusivityController>,
        options: QueueOptions,
    ) -> Self {
        let limiter = options
            .max_concurrent_tasks
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        let name = name.into();
        info!(
            queue = %name,
            max_concurrent_tasks = ?options.max_concurrent_tasks,
            default_timeout = ?options.default_timeout,
            "task queue initialized"
        );
        Self {
            shared: Arc::new(QueueShared {
                name,
                spawner,
                exclusivity,
                options,
                limiter,
                delegate: RwLock::new(None),
                parked: Mutex::new(None),
                live: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// A new queue sharing this queue's runtime and exclusivity controller,
    /// without its concurrency limit or default timeout.
    #[must_use]
    pub fn child_queue(&self, name: impl Into<String>) -> Self {
        Self::new(
            name,
            Arc::clone(&self.shared.spawner),
            Arc::clone(&self.shared.exclusivity),
        )
    }

    /// Queue name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The exclusivity controller this queue registers with.
    #[must_use]
    pub fn exclusivity(&self) -> &Arc<ExclusivityController> {
        &self.shared.exclusivity
    }

    /// Install the delegate. The queue keeps only a weak reference.
    pub fn set_delegate(&self, delegate: &Arc<dyn QueueDelegate>) {
        *self.shared.delegate.write() = Some(Arc::downgrade(delegate));
    }

    fn delegate(&self) -> Option<Arc<dyn QueueDelegate>> {
        self.shared.delegate.read().as_ref().and_then(Weak::upgrade)
    }

    /// Tasks submitted and not yet finished.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.shared.live.lock().values().cloned().collect()
    }

    /// Number of tasks submitted and not yet finished.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.live.lock().len()
    }

    /// Whether every submitted task finished.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every task submitted and not yet finished.
    pub fn cancel_all(&self) {
        for task in self.tasks() {
            task.cancel();
        }
    }

    /// Whether submissions are currently parked.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.shared.parked.lock().is_some()
    }

    /// Suspend or resume the queue. While suspended, submitted tasks are
    /// wired as usual but their drivers do not start; resuming starts every
    /// parked driver in submission order.
    pub fn set_suspended(&self, suspended: bool) {
        let resumed = {
            let mut parked = self.shared.parked.lock();
            match (suspended, parked.is_some()) {
                (true, false) => {
                    *parked = Some(Vec::new());
                    None
                }
                (false, true) => parked.take(),
                _ => None,
            }
        };
        debug!(queue = %self.name(), suspended, "queue suspension changed");
        for task in resumed.unwrap_or_default() {
            self.launch(task);
        }
    }

    /// Submit a task.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::AlreadySubmitted` if the task was handed to a queue before
    /// - `SchedulerError::DependencyCycle` if a condition-injected dependency
    ///   would close a cycle. The task is finished with an `ExecutionFailed`
    ///   error carrying the reason, so waiters are released.
    pub fn submit(&self, task: &Task) -> Result<(), SchedulerError> {
        if !task.mark_submitted() {
            return Err(SchedulerError::AlreadySubmitted(task.id()));
        }
        if task.state() >= TaskState::Finishing {
            debug!(queue = %self.name(), task_id = %task.id(), "task finished before submission");
            if let Some(delegate) = self.delegate() {
                delegate.did_finish(self, task, &task.errors());
            }
            return Ok(());
        }

        if task.is_plain() {
            let queue = Arc::downgrade(&self.shared);
            task.on_completion(move |task| {
                if let Some(queue) = upgrade(&queue) {
                    queue.forget(task);
                    if let Some(delegate) = queue.delegate() {
                        delegate.did_finish(&queue, task, &task.errors());
                    }
                }
            });
        } else if let Err(err) = self.prepare_managed(task) {
            warn!(queue = %self.name(), task_id = %task.id(), error = %err, "task could not be wired");
            task.finish(vec![
                TaskError::execution_failed().with_info(keys::REASON, err.to_string())
            ]);
            return Err(err);
        }

        if !task.will_enqueue() {
            warn!(queue = %self.name(), task_id = %task.id(), state = %task.state(), "task left initialized during submission");
        }
        if let Some(delegate) = self.delegate() {
            delegate.will_submit(self, task);
        }
        debug!(queue = %self.name(), task_id = %task.id(), task = %task.name(), "task submitted");

        self.shared.live.lock().insert(task.id(), task.clone());
        if task.is_finished() {
            self.forget(task);
            return Ok(());
        }
        let task = {
            let mut parked = self.shared.parked.lock();
            match parked.as_mut() {
                Some(parked) => {
                    parked.push(task.clone());
                    return Ok(());
                }
                None => task.clone(),
            }
        };
        self.launch(task);
        Ok(())
    }

    fn prepare_managed(&self, task: &Task) -> Result<(), SchedulerError> {
        task.add_shared_observer(Arc::new(QueueObserver {
            queue: Arc::downgrade(&self.shared),
        }))?;
        if let Some(timeout) = self.shared.options.default_timeout {
            task.add_observer(TimeoutObserver::new(timeout))?;
        }

        let conditions = task.conditions();
        for condition in &conditions {
            let Some(dependency) = condition.dependency_for(task) else {
                continue;
            };
            task.add_dependency(&dependency)?;
            match self.submit(&dependency) {
                Ok(()) | Err(SchedulerError::AlreadySubmitted(_)) => {}
                Err(err) => return Err(err),
            }
            debug!(
                queue = %self.name(),
                task_id = %task.id(),
                condition = condition.name(),
                dependency = %dependency.name(),
                "condition injected dependency"
            );
        }

        let mut categories: Vec<String> = conditions
            .iter()
            .filter(|condition| condition.is_mutually_exclusive())
            .map(|condition| condition.category().to_string())
            .collect();
        categories.sort();
        categories.dedup();
        if !categories.is_empty() {
            task.add_shared_observer(Arc::new(ExclusivityRelease {
                controller: Arc::clone(&self.shared.exclusivity),
                categories: categories.clone(),
            }))?;
            self.shared.exclusivity.register(task, &categories);
        }
        Ok(())
    }

    fn launch(&self, task: Task) {
        let limiter = self.shared.limiter.clone();
        self.shared.spawner.spawn(Box::pin(task.run(limiter)));
    }

    fn forget(&self, task: &Task) {
        self.shared.live.lock().remove(&task.id());
    }

    /// Submit tasks in order. With `wait_until_finished`, block the calling
    /// thread until every one of them finished.
    ///
    /// The wait sleeps on each task's condition variable; call it from a
    /// plain thread, not from inside an async runtime worker.
    ///
    /// # Errors
    ///
    /// Stops at, and returns, the first submission error.
    pub fn submit_batch(
        &self,
        tasks: &[Task],
        wait_until_finished: bool,
    ) -> Result<(), SchedulerError> {
        for task in tasks {
            self.submit(task)?;
        }
        if wait_until_finished {
            for task in tasks {
                task.wait_until_finished();
            }
        }
        Ok(())
    }

    /// Async counterpart of waiting on a batch: resolves once every task in
    /// `tasks` finished.
    pub async fn wait_for(tasks: &[Task]) {
        futures::future::join_all(tasks.iter().map(Task::finished)).await;
    }
}

fn upgrade(shared: &Weak<QueueShared>) -> Option<TaskQueue> {
    shared.upgrade().map(|shared| TaskQueue { shared })
}

/// Bookkeeping attached to every managed task a queue accepts.
struct QueueObserver {
    queue: Weak<QueueShared>,
}

impl Observer for QueueObserver {
    fn on_produce(&self, task: &Task, produced: &Task) {
        let Some(queue) = upgrade(&self.queue) else {
            warn!(task_id = %task.id(), produced = %produced.name(), "queue gone, produced task dropped");
            return;
        };
        if let Err(err) = queue.submit(produced) {
            warn!(queue = %queue.name(), task_id = %task.id(), produced = %produced.name(), error = %err, "produced task not submitted");
        }
    }

    fn on_finish(&self, task: &Task, errors: &[TaskError]) {
        if let Some(queue) = upgrade(&self.queue) {
            queue.forget(task);
            if let Some(delegate) = queue.delegate() {
                delegate.did_finish(&queue, task, errors);
            }
        }
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.name())
            .field("live", &self.len())
            .field("suspended", &self.is_suspended())
            .finish()
    }
}
