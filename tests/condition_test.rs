//! Integration tests for the bundled conditions evaluated through a queue.

use async_trait::async_trait;
use gated_tasks::conditions::{ExternalSignal, MutuallyExclusive, NegatedCondition};
use gated_tasks::core::error::keys;
use gated_tasks::core::{
    Condition, ConditionResult, ErrorCode, ExclusivityController, Task, TaskError, TaskQueue,
};
use gated_tasks::runtime::TokioSpawner;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn queue() -> TaskQueue {
    gated_tasks::util::init_tracing();
    TaskQueue::new(
        "conditions",
        Arc::new(TokioSpawner::current().expect("inside tokio runtime")),
        Arc::new(ExclusivityController::new()),
    )
}

async fn within<F: std::future::Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("did not finish in time")
}

fn requesting_signal<T>(name: &str) -> (ExternalSignal<T>, mpsc::UnboundedReceiver<()>)
where
    T: Clone + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let signal = ExternalSignal::new(name, move || {
        let _ = tx.send(());
    });
    (signal, rx)
}

#[derive(Debug, thiserror::Error)]
#[error("permission denied by user")]
struct Denied;

#[tokio::test(flavor = "multi_thread")]
async fn test_signal_granted_lets_task_run() {
    let queue = queue();
    let (signal, mut requests) = requesting_signal::<String>("push-token");
    let task = Task::from_fn("register", |_| async { Ok(()) });
    task.add_condition(signal.condition()).unwrap();

    queue.submit(&task).unwrap();
    within(requests.recv()).await.unwrap();
    signal.deliver_ok("token-123".to_string()).unwrap();
    within(task.finished()).await;

    assert!(task.errors().is_empty());
    assert_eq!(task.dependencies().len(), 1);
    assert!(matches!(signal.latest(), Some(Ok(token)) if token == "token-123"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_signal_denied_fails_with_underlying_error() {
    let queue = queue();
    let (signal, mut requests) = requesting_signal::<()>("calendar");
    let task = Task::from_fn("read-calendar", |_| async { Ok(()) });
    task.add_condition(signal.condition()).unwrap();

    queue.submit(&task).unwrap();
    within(requests.recv()).await.unwrap();
    signal.deliver_err(Denied).unwrap();
    within(task.finished()).await;

    let errors = task.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code(), ErrorCode::ConditionFailed);
    assert_eq!(errors[0].condition(), Some("Signal<calendar>"));
    assert_eq!(
        errors[0].underlying().map(ToString::to_string).as_deref(),
        Some("permission denied by user")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_signal_requests_are_serialized() {
    let queue = queue();
    let (signal, mut requests) = requesting_signal::<bool>("photos");
    let first = Task::from_fn("first", |_| async { Ok(()) });
    let second = Task::from_fn("second", |_| async { Ok(()) });
    first.add_condition(signal.condition()).unwrap();
    second.add_condition(signal.condition()).unwrap();

    queue.submit(&first).unwrap();
    queue.submit(&second).unwrap();

    within(requests.recv()).await.unwrap();
    // Only one prompt may be outstanding.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(requests.try_recv().is_err());
    signal.deliver_ok(true).unwrap();

    within(requests.recv()).await.unwrap();
    signal.deliver_ok(true).unwrap();

    within(TaskQueue::wait_for(&[first.clone(), second.clone()])).await;
    assert!(first.errors().is_empty());
    assert!(second.errors().is_empty());
}

struct CountingCondition {
    evaluations: Arc<AtomicUsize>,
    satisfied: bool,
}

#[async_trait]
impl Condition for CountingCondition {
    fn name(&self) -> &str {
        "Counting"
    }

    async fn evaluate_for(&self, _task: &Task) -> ConditionResult {
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        if self.satisfied {
            ConditionResult::Satisfied
        } else {
            ConditionResult::Failed(TaskError::condition_failed(self.name()))
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_every_condition_evaluated_even_after_failure() {
    let queue = queue();
    let evaluations = Arc::new(AtomicUsize::new(0));
    let task = Task::from_fn("many-conditions", |_| async { Ok(()) });
    for satisfied in [false, true, false] {
        task.add_condition(CountingCondition {
            evaluations: Arc::clone(&evaluations),
            satisfied,
        })
        .unwrap();
    }

    queue.submit(&task).unwrap();
    within(task.finished()).await;

    assert_eq!(evaluations.load(Ordering::SeqCst), 3);
    assert_eq!(task.errors().len(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_negated_condition_through_queue() {
    let queue = queue();
    let evaluations = Arc::new(AtomicUsize::new(0));
    let runs = Task::from_fn("not-counting", |_| async { Ok(()) });
    runs.add_condition(NegatedCondition::new(CountingCondition {
        evaluations: Arc::clone(&evaluations),
        satisfied: false,
    }))
    .unwrap();
    let blocked = Task::from_fn("not-exclusive", |_| async { Ok(()) });
    blocked
        .add_condition(NegatedCondition::new(MutuallyExclusive::named("N")))
        .unwrap();

    queue.submit(&runs).unwrap();
    queue.submit(&blocked).unwrap();
    within(TaskQueue::wait_for(&[runs.clone(), blocked.clone()])).await;

    assert!(runs.errors().is_empty());
    let errors = blocked.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].condition(), Some("Not<N>"));
    assert_eq!(
        errors[0].get(keys::NEGATED_CONDITION),
        Some(&serde_json::json!("N"))
    );
}
