//! Builders to construct task queues from configuration.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use tokio::runtime::Handle;

use crate::config::{QueueConfig, SchedulerConfig};
use crate::core::{AppResult, ExclusivityController, SchedulerError, TaskQueue};
use crate::runtime::TokioSpawner;

fn invalid(e: String) -> SchedulerError {
    SchedulerError::Backend(format!("config invalid: {e}"))
}

/// Build a queue running on a dedicated runtime with
/// `cfg.worker_threads` workers and its own exclusivity controller.
///
/// # Errors
///
/// `SchedulerError::Backend` for invalid configuration or a runtime that
/// failed to start.
pub fn build_queue(cfg: &QueueConfig) -> Result<TaskQueue, SchedulerError> {
    cfg.validate().map_err(invalid)?;
    let spawner = TokioSpawner::with_worker_threads(cfg.worker_threads)
        .map_err(|e| SchedulerError::Backend(format!("runtime start failed: {e}")))?;
    Ok(TaskQueue::with_options(
        cfg.name.clone(),
        Arc::new(spawner),
        Arc::new(ExclusivityController::new()),
        cfg.options(),
    ))
}

/// Bootstrap a queue from `GATED_TASKS_*` environment variables on a
/// dedicated runtime.
///
/// # Errors
///
/// Fails with context if the environment is invalid or the runtime cannot
/// start.
pub fn build_queue_from_env() -> AppResult<TaskQueue> {
    let cfg = QueueConfig::from_env()
        .map_err(anyhow::Error::msg)
        .context("loading queue configuration from environment")?;
    let queue = build_queue(&cfg).with_context(|| format!("starting queue `{}`", cfg.name))?;
    Ok(queue)
}

/// Build a queue on an existing runtime. `cfg.worker_threads` is ignored.
///
/// # Errors
///
/// `SchedulerError::Backend` for invalid configuration.
pub fn build_queue_with(cfg: &QueueConfig, handle: Handle) -> Result<TaskQueue, SchedulerError> {
    cfg.validate().map_err(invalid)?;
    Ok(TaskQueue::with_options(
        cfg.name.clone(),
        Arc::new(TokioSpawner::new(handle)),
        Arc::new(ExclusivityController::new()),
        cfg.options(),
    ))
}

/// Build every configured queue on `handle`. The queues share one
/// exclusivity controller, so categories serialize across them.
///
/// # Errors
///
/// `SchedulerError::Backend` for invalid configuration.
pub fn build_queues(
    cfg: &SchedulerConfig,
    handle: &Handle,
) -> Result<HashMap<String, TaskQueue>, SchedulerError> {
    cfg.validate().map_err(invalid)?;
    let exclusivity = Arc::new(ExclusivityController::new());
    let spawner = Arc::new(TokioSpawner::new(handle.clone()));
    Ok(cfg
        .queues
        .iter()
        .map(|(name, queue_cfg)| {
            let queue = TaskQueue::with_options(
                name.clone(),
                spawner.clone(),
                Arc::clone(&exclusivity),
                queue_cfg.options(),
            );
            (name.clone(), queue)
        })
        .collect())
}
