//! Automatic cancellation of tasks that run too long.

use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{error, warn};

use crate::core::error::keys;
use crate::core::{Observer, Task, TaskError};

/// Cancels a task with an `ExecutionFailed` timeout error if it has neither
/// finished nor been cancelled `timeout` after it started.
///
/// A timed-out task is abandoned: it is finished right away with the timeout
/// error, and a later `finish` from its still-running work is ignored.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutObserver {
    timeout: Duration,
}

impl TimeoutObserver {
    /// Bound execution to `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// The configured bound.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    fn error(&self) -> TaskError {
        let millis = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        TaskError::execution_failed().with_info(keys::TIMEOUT_MS, millis)
    }
}

impl Observer for TimeoutObserver {
    fn on_start(&self, task: &Task) {
        let Ok(handle) = Handle::try_current() else {
            error!(task_id = %task.id(), "timeout observer started outside a tokio runtime");
            debug_assert!(false, "TimeoutObserver requires a tokio runtime");
            return;
        };

        let task = task.clone();
        let timeout = self.timeout;
        let error = self.error();
        handle.spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(timeout) => {
                    if !task.is_finished() && !task.is_cancelled() {
                        warn!(task_id = %task.id(), task = %task.name(), ?timeout, "task timed out");
                        task.cancel_with_error(error);
                        task.finish_ok();
                    }
                }
                () = task.finished() => {}
            }
        });
    }
}
