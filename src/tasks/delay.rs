//! A task that does nothing but wait.

use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tracing::debug;

use crate::core::{Task, Work};
use crate::util::clock::remaining_until;

/// How long a [`DelayTask`] waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delay {
    /// A relative interval, measured from when the task starts executing.
    Interval(Duration),
    /// An absolute wall-clock instant. Instants in the past finish at once.
    Until(SystemTime),
}

impl Delay {
    fn remaining(self) -> Duration {
        match self {
            Self::Interval(interval) => interval,
            Self::Until(deadline) => remaining_until(deadline),
        }
    }
}

struct DelayWork {
    delay: Delay,
}

#[async_trait]
impl Work for DelayWork {
    async fn execute(&self, task: &Task) {
        let remaining = self.delay.remaining();
        if remaining.is_zero() {
            task.finish_ok();
            return;
        }
        debug!(task_id = %task.id(), delay_ms = remaining.as_millis(), "delay started");
        tokio::select! {
            () = tokio::time::sleep(remaining) => task.finish_ok(),
            () = task.finished() => {}
        }
    }

    fn cancelled(&self, task: &Task) {
        task.finish_ok();
    }
}

/// Builds tasks that finish after a delay, e.g. as a dependency that
/// postpones another task.
#[derive(Debug, Clone, Copy)]
pub struct DelayTask;

impl DelayTask {
    /// A task finishing `interval` after it starts executing.
    #[must_use]
    pub fn interval(interval: Duration) -> Task {
        Self::new(Delay::Interval(interval))
    }

    /// A task finishing at `deadline`.
    #[must_use]
    pub fn until(deadline: SystemTime) -> Task {
        Self::new(Delay::Until(deadline))
    }

    /// A task waiting for `delay`.
    #[must_use]
    pub fn new(delay: Delay) -> Task {
        Task::new(format!("Delay({delay:?})"), DelayWork { delay })
    }
}
