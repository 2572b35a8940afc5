//! Conditions satisfied by a value delivered from outside the scheduler.
//!
//! Typical use is a system permission prompt or a push-registration
//! callback: the host is asked to start the request, and later hands the
//! outcome back through [`ExternalSignal::deliver_ok`] or
//! [`ExternalSignal::deliver_err`]. The request runs as an injected
//! dependency task, serialized per signal so only one prompt is ever
//! outstanding.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, error};

use super::MutuallyExclusive;
use crate::core::error::keys;
use crate::core::{Condition, ConditionResult, SchedulerError, Task, TaskError, UnderlyingError};

#[derive(Clone)]
enum SignalState<T> {
    Idle,
    Requested,
    Delivered(Result<T, UnderlyingError>),
}

type RequestFn = Box<dyn Fn() + Send + Sync>;

struct SignalInner<T> {
    name: String,
    request: RequestFn,
    state: watch::Sender<SignalState<T>>,
}

/// Bridge between a host callback and the conditions waiting on it.
///
/// Cheap to clone; clones share the same outcome.
pub struct ExternalSignal<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T> Clone for ExternalSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> ExternalSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a signal. `request` is invoked each time a request task runs
    /// and must return promptly; the outcome arrives later via `deliver_*`.
    pub fn new(name: impl Into<String>, request: impl Fn() + Send + Sync + 'static) -> Self {
        let (state, _) = watch::channel(SignalState::Idle);
        Self {
            inner: Arc::new(SignalInner {
                name: name.into(),
                request: Box::new(request),
                state,
            }),
        }
    }

    /// Signal name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether a request was issued and no outcome delivered yet.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        matches!(*self.inner.state.borrow(), SignalState::Requested)
    }

    /// Last delivered outcome, if any.
    #[must_use]
    pub fn latest(&self) -> Option<Result<T, UnderlyingError>> {
        match &*self.inner.state.borrow() {
            SignalState::Delivered(outcome) => Some(outcome.clone()),
            SignalState::Idle | SignalState::Requested => None,
        }
    }

    /// Deliver a successful outcome.
    ///
    /// # Errors
    ///
    /// `SchedulerError::UnexpectedSignal` if no request is outstanding.
    pub fn deliver_ok(&self, value: T) -> Result<(), SchedulerError> {
        self.deliver(Ok(value))
    }

    /// Deliver a failed outcome; the collaborator error is carried into the
    /// condition failure as its source.
    ///
    /// # Errors
    ///
    /// `SchedulerError::UnexpectedSignal` if no request is outstanding.
    pub fn deliver_err<E>(&self, error: E) -> Result<(), SchedulerError>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.deliver(Err(Arc::new(error)))
    }

    fn deliver(&self, outcome: Result<T, UnderlyingError>) -> Result<(), SchedulerError> {
        let mut outcome = Some(outcome);
        let delivered = self.inner.state.send_if_modified(|state| {
            if !matches!(state, SignalState::Requested) {
                return false;
            }
            if let Some(outcome) = outcome.take() {
                *state = SignalState::Delivered(outcome);
            }
            true
        });
        if delivered {
            debug!(signal = %self.name(), "signal delivered");
            return Ok(());
        }
        error!(signal = %self.name(), "signal delivered without an outstanding request");
        debug_assert!(
            false,
            "signal `{}` delivered without an outstanding request",
            self.name()
        );
        Err(SchedulerError::UnexpectedSignal(self.name().to_string()))
    }

    /// A task that issues the request and finishes once an outcome is
    /// delivered. Request tasks of one signal never overlap.
    #[must_use]
    pub fn request_task(&self) -> Task {
        let signal = self.clone();
        let task = Task::from_fn(format!("{}.request", self.name()), move |_| {
            let signal = signal.clone();
            async move {
                signal.request().await;
                Ok(())
            }
        });
        if let Err(err) = task.add_condition(MutuallyExclusive::named(format!(
            "SignalRequest<{}>",
            self.name()
        ))) {
            error!(signal = %self.name(), error = %err, "request task rejected its exclusivity condition");
        }
        task
    }

    /// A condition satisfied once this signal delivered a successful
    /// outcome.
    #[must_use]
    pub fn condition(&self) -> SignalCondition<T> {
        SignalCondition::new(self.clone())
    }

    async fn request(&self) {
        self.inner.state.send_replace(SignalState::Requested);
        debug!(signal = %self.name(), "signal requested");
        (self.inner.request)();
        self.settled().await;
    }

    async fn settled(&self) {
        let mut rx = self.inner.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx
            .wait_for(|state| !matches!(state, SignalState::Requested))
            .await;
    }
}

impl<T> fmt::Debug for ExternalSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.state.borrow() {
            SignalState::Idle => "idle",
            SignalState::Requested => "requested",
            SignalState::Delivered(Ok(_)) => "delivered",
            SignalState::Delivered(Err(_)) => "failed",
        };
        f.debug_struct("ExternalSignal")
            .field("name", &self.inner.name)
            .field("state", &state)
            .finish()
    }
}

/// Condition backed by an [`ExternalSignal`].
///
/// Injects the signal's request task as a dependency, then passes if the
/// delivered outcome is `Ok`. A delivered error becomes the failure's
/// underlying source.
#[derive(Debug)]
pub struct SignalCondition<T> {
    signal: ExternalSignal<T>,
    name: String,
}

impl<T> SignalCondition<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Condition over `signal`.
    pub fn new(signal: ExternalSignal<T>) -> Self {
        let name = format!("Signal<{}>", signal.name());
        Self { signal, name }
    }
}

#[async_trait]
impl<T> Condition for SignalCondition<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn dependency_for(&self, _task: &Task) -> Option<Task> {
        Some(self.signal.request_task())
    }

    async fn evaluate_for(&self, _task: &Task) -> ConditionResult {
        self.signal.settled().await;
        match self.signal.latest() {
            Some(Ok(_)) => ConditionResult::Satisfied,
            Some(Err(source)) => ConditionResult::Failed(
                TaskError::condition_failed(self.name.clone()).with_shared_source(source),
            ),
            None => ConditionResult::Failed(
                TaskError::condition_failed(self.name.clone())
                    .with_info(keys::REASON, "no outcome delivered"),
            ),
        }
    }
}
