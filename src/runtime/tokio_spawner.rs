//! Tokio runtime spawner implementation.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::runtime::{Handle, Runtime};

use crate::core::SchedulerError;

/// Abstraction for spawning task drivers on a runtime.
///
/// Object safe so queues can share one spawner behind an `Arc`.
pub trait Spawn: Send + Sync + 'static {
    /// Spawn a detached future.
    fn spawn(&self, fut: BoxFuture<'static, ()>);
}

/// Tokio-based spawner that executes task drivers on a tokio runtime.
///
/// Either borrows a runtime through its [`Handle`] or owns a dedicated
/// multi-threaded runtime that lives as long as any clone of the spawner.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: Handle,
    runtime: Option<Arc<OwnedRuntime>>,
}

/// Owned runtime shut down without blocking, so the last spawner clone may
/// be dropped from inside one of its own worker threads.
struct OwnedRuntime(Option<Runtime>);

impl Drop for OwnedRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

impl TokioSpawner {
    /// Create a spawner from a tokio runtime handle.
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self {
            handle,
            runtime: None,
        }
    }

    /// Spawner for the runtime the caller is running in.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Backend` outside of a tokio runtime.
    pub fn current() -> Result<Self, SchedulerError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| SchedulerError::Backend(format!("no tokio runtime: {e}")))
    }

    /// Create a TokioSpawner owning a new multi-threaded runtime with the
    /// specified number of worker threads.
    ///
    /// # Errors
    ///
    /// Propagates the runtime builder's I/O error.
    pub fn with_worker_threads(worker_threads: usize) -> Result<Self, std::io::Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("gated-tasks-worker")
            .enable_all()
            .build()?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(Arc::new(OwnedRuntime(Some(runtime)))),
        })
    }

    /// Handle of the underlying runtime.
    #[must_use]
    pub const fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Spawn for TokioSpawner {
    fn spawn(&self, fut: BoxFuture<'static, ()>) {
        self.handle.spawn(fut);
    }
}

impl fmt::Debug for TokioSpawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioSpawner")
            .field("owns_runtime", &self.runtime.is_some())
            .finish()
    }
}
