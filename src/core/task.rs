//! The schedulable task and its lifecycle state machine.
//!
//! A [`Task`] is a cheap, cloneable handle to shared task state. Producers
//! build one around a [`Work`] implementation, attach conditions, observers
//! and dependencies, then hand it to a [`TaskQueue`](super::TaskQueue).
//!
//! ```text
//! Initialized -> Pending -> EvaluatingConditions -> Ready -> Executing -> Finishing -> Finished
//!                   |              |                  |                      ^
//!                   +--------------+------------------+----------------------+
//!                        (cancellation or failed conditions skip ahead)
//! ```
//!
//! Finishing is guarded by a one-shot latch: whichever of natural completion,
//! cancellation or condition failure reaches it first wins, and every later
//! attempt is a no-op.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Condvar, Mutex, ReentrantMutex};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::condition::{evaluate_all, Condition};
use super::error::{keys, SchedulerError, TaskError};
use super::observer::Observer;

/// Serializes dependency-graph edits so the cycle check and the insert of an
/// edge are atomic with respect to other edits. Lock order: graph, then a
/// task's state, then its dependency list.
static DEPENDENCY_GRAPH: Mutex<()> = Mutex::new(());

/// Unique identity of a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Uuid);

impl TaskId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// Lifecycle state of a task. Variants are ordered by progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Built but not yet submitted.
    Initialized,
    /// Submitted; waiting for dependencies.
    Pending,
    /// Dependencies finished; conditions are being evaluated.
    EvaluatingConditions,
    /// Every condition was satisfied.
    Ready,
    /// User work is running.
    Executing,
    /// Errors are collected and observers notified.
    Finishing,
    /// Terminal.
    Finished,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initialized => "initialized",
            Self::Pending => "pending",
            Self::EvaluatingConditions => "evaluating_conditions",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Finishing => "finishing",
            Self::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// The user work a task performs once its gates open.
///
/// `execute` must eventually lead to [`Task::finish`] being called, either
/// before it returns or later from a timer, callback or another task. The
/// scheduler does not finish the task when `execute` returns.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use gated_tasks::core::{Task, Work};
///
/// struct Download { url: String }
///
/// #[async_trait]
/// impl Work for Download {
///     async fn execute(&self, task: &Task) {
///         let result = fetch(&self.url).await;
///         task.finish_with_error(result.err());
///     }
/// }
/// ```
#[async_trait]
pub trait Work: Send + Sync + 'static {
    /// Run the work. `task` is the handle of the task being executed.
    async fn execute(&self, task: &Task);

    /// Invoked after the task's cancellation flag is set.
    fn cancelled(&self, _task: &Task) {}

    /// Invoked while finishing, before observers see the errors.
    /// The task may still [`produce`](Task::produce) follow-up tasks here.
    fn finished(&self, _task: &Task, _errors: &[TaskError]) {}
}

type BlockBody = dyn Fn(Task) -> BoxFuture<'static, Result<(), TaskError>> + Send + Sync;

/// Work defined by an async closure; the task finishes with its result.
struct BlockWork {
    body: Box<BlockBody>,
}

#[async_trait]
impl Work for BlockWork {
    async fn execute(&self, task: &Task) {
        let outcome = (self.body)(task.clone()).await;
        task.finish_with_error(outcome.err());
    }
}

type Completion = Box<dyn FnOnce(&Task) + Send>;

struct TaskCore {
    id: TaskId,
    name: String,
    plain: bool,
    work: Box<dyn Work>,
    state: Mutex<TaskState>,
    state_changed: Condvar,
    finished_tx: watch::Sender<bool>,
    cancelled: AtomicBool,
    user_initiated: AtomicBool,
    submitted: AtomicBool,
    dependencies: Mutex<Vec<Task>>,
    conditions: Mutex<Vec<Arc<dyn Condition>>>,
    observers: Mutex<Vec<Arc<dyn Observer>>>,
    errors: Mutex<Vec<TaskError>>,
    completions: Mutex<Vec<Completion>>,
    /// Serializes observer callbacks so start/produce/finish never interleave.
    dispatch: ReentrantMutex<()>,
}

/// Handle to a schedulable unit of work.
///
/// Clones share the same task. Equality and hashing use the task identity.
#[derive(Clone)]
pub struct Task {
    core: Arc<TaskCore>,
}

/// Non-owning task reference, for state that must not keep a task alive.
#[derive(Clone)]
pub struct WeakTask {
    core: Weak<TaskCore>,
}

impl WeakTask {
    /// Recover the task if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Task> {
        self.core.upgrade().map(|core| Task { core })
    }
}

impl Task {
    /// Create a managed task around `work`.
    pub fn new(name: impl Into<String>, work: impl Work) -> Self {
        Self::build(name.into(), Box::new(work), false)
    }

    /// Create a managed task from an async closure. The task finishes with
    /// the closure's error, if any, once the returned future resolves.
    pub fn from_fn<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let work = BlockWork {
            body: Box::new(move |task| body(task).boxed()),
        };
        Self::build(name.into(), Box::new(work), false)
    }

    /// Create a plain unit of work. The queue runs it after its dependencies
    /// without any condition or exclusivity machinery.
    pub fn plain<F, Fut>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let work = BlockWork {
            body: Box::new(move |_| body().map(|()| Ok::<(), TaskError>(())).boxed()),
        };
        Self::build(name.into(), Box::new(work), true)
    }

    fn build(name: String, work: Box<dyn Work>, plain: bool) -> Self {
        let (finished_tx, _) = watch::channel(false);
        Self {
            core: Arc::new(TaskCore {
                id: TaskId::new(),
                name,
                plain,
                work,
                state: Mutex::new(TaskState::Initialized),
                state_changed: Condvar::new(),
                finished_tx,
                cancelled: AtomicBool::new(false),
                user_initiated: AtomicBool::new(false),
                submitted: AtomicBool::new(false),
                dependencies: Mutex::new(Vec::new()),
                conditions: Mutex::new(Vec::new()),
                observers: Mutex::new(Vec::new()),
                errors: Mutex::new(Vec::new()),
                completions: Mutex::new(Vec::new()),
                dispatch: ReentrantMutex::new(()),
            }),
        }
    }

    /// Task identity.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.core.id
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        *self.core.state.lock()
    }

    /// Whether the task has reached [`TaskState::Finished`].
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state() == TaskState::Finished
    }

    /// Whether user work is currently running.
    #[must_use]
    pub fn is_executing(&self) -> bool {
        self.state() == TaskState::Executing
    }

    /// Whether the task was cancelled. Once true, stays true.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.core.cancelled.load(Ordering::Acquire)
    }

    /// Whether this is a plain unit of work.
    #[must_use]
    pub fn is_plain(&self) -> bool {
        self.core.plain
    }

    /// Hint for collaborators deciding whether to surface failures to a user.
    #[must_use]
    pub fn user_initiated(&self) -> bool {
        self.core.user_initiated.load(Ordering::Relaxed)
    }

    /// Set the user-initiated hint. Ignored once the task left `Initialized`.
    pub fn set_user_initiated(&self, value: bool) {
        if self.state() != TaskState::Initialized {
            warn!(task_id = %self.id(), task = %self.name(), "user_initiated changed after submission ignored");
            return;
        }
        self.core.user_initiated.store(value, Ordering::Relaxed);
    }

    /// Errors accumulated so far.
    #[must_use]
    pub fn errors(&self) -> Vec<TaskError> {
        self.core.errors.lock().clone()
    }

    /// Direct dependencies.
    #[must_use]
    pub fn dependencies(&self) -> Vec<Task> {
        self.core.dependencies.lock().clone()
    }

    /// Attached conditions in attachment order.
    #[must_use]
    pub fn conditions(&self) -> Vec<Arc<dyn Condition>> {
        self.core.conditions.lock().clone()
    }

    fn observers(&self) -> Vec<Arc<dyn Observer>> {
        self.core.observers.lock().clone()
    }

    /// Non-owning reference to this task.
    #[must_use]
    pub fn downgrade(&self) -> WeakTask {
        WeakTask {
            core: Arc::downgrade(&self.core),
        }
    }

    fn invalid_state(&self, action: &'static str, state: TaskState) -> SchedulerError {
        SchedulerError::InvalidState {
            task: self.id(),
            action,
            state: state.to_string(),
        }
    }

    /// Attach a condition. Only valid before submission.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::PlainTask` for plain units of work
    /// - `SchedulerError::InvalidState` once the task was submitted
    pub fn add_condition(&self, condition: impl Condition) -> Result<(), SchedulerError> {
        self.add_shared_condition(Arc::new(condition))
    }

    /// Attach an already shared condition. Only valid before submission.
    ///
    /// # Errors
    ///
    /// Same as [`Task::add_condition`].
    pub fn add_shared_condition(&self, condition: Arc<dyn Condition>) -> Result<(), SchedulerError> {
        if self.is_plain() {
            return Err(SchedulerError::PlainTask(self.id()));
        }
        let state = self.core.state.lock();
        if *state != TaskState::Initialized {
            return Err(self.invalid_state("add a condition", *state));
        }
        self.core.conditions.lock().push(condition);
        Ok(())
    }

    /// Attach an observer. Only valid before submission.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidState` once the task was submitted.
    pub fn add_observer(&self, observer: impl Observer) -> Result<(), SchedulerError> {
        self.add_shared_observer(Arc::new(observer))
    }

    /// Attach an already shared observer. Only valid before submission.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidState` once the task was submitted.
    pub fn add_shared_observer(&self, observer: Arc<dyn Observer>) -> Result<(), SchedulerError> {
        let state = self.core.state.lock();
        if *state != TaskState::Initialized {
            return Err(self.invalid_state("add an observer", *state));
        }
        self.core.observers.lock().push(observer);
        Ok(())
    }

    /// Make this task wait for `dependency` to finish before evaluating its
    /// conditions. Valid until the task leaves `Pending`.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::SelfDependency` if `dependency` is this task
    /// - `SchedulerError::DependencyCycle` if `dependency` already waits on this task
    /// - `SchedulerError::InvalidState` once conditions are being evaluated
    pub fn add_dependency(&self, dependency: &Self) -> Result<(), SchedulerError> {
        if dependency == self {
            return Err(SchedulerError::SelfDependency(self.id()));
        }
        let _graph = DEPENDENCY_GRAPH.lock();
        if dependency.depends_on(self) {
            return Err(SchedulerError::DependencyCycle {
                task: self.id(),
                dependency: dependency.id(),
            });
        }
        let state = self.core.state.lock();
        if *state > TaskState::Pending {
            return Err(self.invalid_state("add a dependency", *state));
        }
        let mut dependencies = self.core.dependencies.lock();
        if !dependencies.contains(dependency) {
            dependencies.push(dependency.clone());
        }
        Ok(())
    }

    /// Add several dependencies, stopping at the first error.
    ///
    /// # Errors
    ///
    /// Same as [`Task::add_dependency`].
    pub fn add_dependencies<'a>(
        &self,
        dependencies: impl IntoIterator<Item = &'a Self>,
    ) -> Result<(), SchedulerError> {
        for dependency in dependencies {
            self.add_dependency(dependency)?;
        }
        Ok(())
    }

    /// Whether this task waits on `other`, directly or transitively.
    #[must_use]
    pub fn depends_on(&self, other: &Self) -> bool {
        let mut stack = self.dependencies();
        let mut seen = HashSet::new();
        while let Some(dependency) = stack.pop() {
            if dependency == *other {
                return true;
            }
            if seen.insert(dependency.id()) {
                stack.extend(dependency.dependencies());
            }
        }
        false
    }

    /// Register a closure to run once after the task reaches `Finished`.
    /// Runs immediately on the calling thread if the task already finished.
    pub fn on_completion(&self, block: impl FnOnce(&Self) + Send + 'static) {
        {
            let mut completions = self.core.completions.lock();
            if *self.core.state.lock() != TaskState::Finished {
                completions.push(Box::new(block));
                return;
            }
        }
        block(self);
    }

    /// Announce a follow-up task to this task's observers. The queue that
    /// accepted this task submits `task` to itself in response.
    pub fn produce(&self, task: Self) {
        let state = self.state();
        if !matches!(state, TaskState::Executing | TaskState::Finishing) {
            warn!(task_id = %self.id(), task = %self.name(), %state, produced = %task.name(), "task produced work outside execution");
        }
        debug!(task_id = %self.id(), task = %self.name(), produced = %task.name(), "task produced follow-up");
        let _dispatch = self.core.dispatch.lock();
        for observer in self.observers() {
            observer.on_produce(self, &task);
        }
    }

    /// Finish with no additional errors.
    pub fn finish_ok(&self) {
        self.finish(Vec::new());
    }

    /// Finish with at most one additional error.
    pub fn finish_with_error(&self, error: Option<TaskError>) {
        self.finish(error.into_iter().collect());
    }

    /// Move the task to `Finished`, appending `errors`.
    ///
    /// Runs exactly once per task; later calls are ignored. Observers are
    /// notified in registration order before the state becomes `Finished`,
    /// then completion blocks run, then async waiters of [`Task::finished`]
    /// wake.
    pub fn finish(&self, errors: Vec<TaskError>) {
        {
            let mut state = self.core.state.lock();
            if *state >= TaskState::Finishing {
                debug!(task_id = %self.id(), task = %self.name(), "finish ignored, already finishing");
                return;
            }
            *state = TaskState::Finishing;
        }

        let errors = {
            let mut all = self.core.errors.lock();
            all.extend(errors);
            all.clone()
        };
        debug!(
            task_id = %self.id(),
            task = %self.name(),
            errors = errors.len(),
            cancelled = self.is_cancelled(),
            "task finishing"
        );

        self.core.work.finished(self, &errors);
        {
            let _dispatch = self.core.dispatch.lock();
            for observer in self.observers() {
                observer.on_finish(self, &errors);
            }
        }

        let completions = {
            let mut completions = self.core.completions.lock();
            *self.core.state.lock() = TaskState::Finished;
            self.core.state_changed.notify_all();
            std::mem::take(&mut *completions)
        };
        for block in completions {
            block(self);
        }
        // Async waiters, dependents included, wake only after completion
        // blocks ran.
        self.core.finished_tx.send_replace(true);
    }

    /// Cancel the task.
    ///
    /// Before user work starts, the task finishes immediately without ever
    /// executing. Once executing, only the flag is set and the work is
    /// expected to notice and finish promptly. No-op once finishing.
    pub fn cancel(&self) {
        self.cancel_inner(None);
    }

    /// Cancel the task, recording `error` among its errors.
    pub fn cancel_with_error(&self, error: TaskError) {
        self.cancel_inner(Some(error));
    }

    fn cancel_inner(&self, mut error: Option<TaskError>) {
        let started = {
            let state = self.core.state.lock();
            if *state >= TaskState::Finishing {
                return;
            }
            self.core.cancelled.store(true, Ordering::Release);
            let started = *state == TaskState::Executing;
            if started {
                if let Some(error) = error.take() {
                    self.core.errors.lock().push(error);
                }
            }
            started
        };
        debug!(task_id = %self.id(), task = %self.name(), started, "task cancelled");

        if !started {
            self.finish(error.into_iter().collect());
        }
        self.core.work.cancelled(self);
    }

    /// Block the calling thread until the task finishes.
    ///
    /// Uses a condition variable, so the thread sleeps rather than polls.
    /// Do not call from inside an async runtime worker.
    pub fn wait_until_finished(&self) {
        let mut state = self.core.state.lock();
        while *state != TaskState::Finished {
            self.core.state_changed.wait(&mut state);
        }
    }

    /// Like [`Task::wait_until_finished`] with an upper bound.
    /// Returns whether the task finished in time.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.core.state.lock();
        while *state != TaskState::Finished {
            if self
                .core
                .state_changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return *state == TaskState::Finished;
            }
        }
        true
    }

    /// Resolve once the task reaches `Finished`.
    pub async fn finished(&self) {
        let mut rx = self.core.finished_tx.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Claim the task for a queue. Returns `false` if it was already claimed.
    pub(crate) fn mark_submitted(&self) -> bool {
        !self.core.submitted.swap(true, Ordering::AcqRel)
    }

    /// `Initialized -> Pending`, once the queue finished wiring the task.
    pub(crate) fn will_enqueue(&self) -> bool {
        self.transition(TaskState::Initialized, TaskState::Pending)
    }

    fn transition(&self, from: TaskState, to: TaskState) -> bool {
        let mut state = self.core.state.lock();
        if *state != from {
            return false;
        }
        *state = to;
        debug!(task_id = %self.id(), task = %self.name(), %from, %to, "task transition");
        true
    }

    fn unfinished_dependencies(&self) -> Vec<Self> {
        self.core
            .dependencies
            .lock()
            .iter()
            .filter(|dependency| !dependency.finish_signalled())
            .cloned()
            .collect()
    }

    /// Whether async waiters were released, which happens after completion
    /// blocks ran.
    fn finish_signalled(&self) -> bool {
        *self.core.finished_tx.borrow()
    }

    async fn wait_for_dependencies(&self) {
        loop {
            let pending = self.unfinished_dependencies();
            if pending.is_empty() || self.state() >= TaskState::Finishing {
                return;
            }
            for dependency in pending {
                tokio::select! {
                    () = dependency.finished() => {}
                    () = self.finished() => return,
                }
            }
        }
    }

    /// `Pending -> EvaluatingConditions`, re-checked under the state lock so
    /// a dependency added while waiting is never skipped.
    async fn enter_evaluation(&self) -> bool {
        loop {
            {
                let mut state = self.core.state.lock();
                if *state != TaskState::Pending {
                    return false;
                }
                let ready = self
                    .core
                    .dependencies
                    .lock()
                    .iter()
                    .all(Self::is_finished);
                if ready {
                    *state = TaskState::EvaluatingConditions;
                    debug!(task_id = %self.id(), task = %self.name(), "dependencies finished, evaluating conditions");
                    return true;
                }
            }
            self.wait_for_dependencies().await;
        }
    }

    fn begin_execution(&self) -> bool {
        {
            let mut state = self.core.state.lock();
            if *state != TaskState::Ready {
                return false;
            }
            if !self.is_cancelled() {
                *state = TaskState::Executing;
                debug!(task_id = %self.id(), task = %self.name(), "task executing");
                return true;
            }
        }
        self.finish(Vec::new());
        false
    }

    /// Drive the task from `Pending` to the start of its user work.
    ///
    /// Every suspension point is an await on a finish notification, so the
    /// worker thread is free while the task waits.
    pub(crate) async fn run(self, limiter: Option<Arc<Semaphore>>) {
        self.wait_for_dependencies().await;
        let permit = match limiter {
            Some(limiter) => limiter.acquire_owned().await.ok(),
            None => None,
        };
        if !self.enter_evaluation().await {
            return;
        }

        let failures = evaluate_all(&self).await;
        if !failures.is_empty() {
            debug!(task_id = %self.id(), task = %self.name(), failures = failures.len(), "conditions failed");
            self.finish(failures);
            return;
        }
        if !self.transition(TaskState::EvaluatingConditions, TaskState::Ready) {
            return;
        }
        if !self.begin_execution() {
            return;
        }

        {
            let _dispatch = self.core.dispatch.lock();
            for observer in self.observers() {
                observer.on_start(&self);
            }
        }

        let outcome = AssertUnwindSafe(self.core.work.execute(&self))
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            let message = panic_message(panic.as_ref());
            error!(task_id = %self.id(), task = %self.name(), panic = %message, "task work panicked");
            self.finish(vec![TaskError::execution_failed().with_info(keys::PANIC, message)]);
        }

        if permit.is_some() {
            self.finished().await;
        }
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.core.id == other.core.id
    }
}

impl Eq for Task {}

impl std::hash::Hash for Task {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.core.id.hash(state);
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl fmt::Debug for WeakTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(task) => write!(f, "WeakTask({task:?})"),
            None => f.write_str("WeakTask(<dropped>)"),
        }
    }
}
