//! Queue configuration structures.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::QueueOptions;

/// Environment variable prefix read by [`QueueConfig::from_env`].
pub const ENV_PREFIX: &str = "GATED_TASKS_";

fn default_name() -> String {
    "default".to_string()
}

fn default_worker_threads() -> usize {
    num_cpus::get()
}

/// Queue configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue name, used in logs.
    #[serde(default = "default_name")]
    pub name: String,
    /// Worker threads of the runtime a builder creates for the queue.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Upper bound on tasks past their dependencies at once.
    #[serde(default)]
    pub max_concurrent_tasks: Option<usize>,
    /// Timeout, in milliseconds, attached to every managed task.
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            worker_threads: default_worker_threads(),
            max_concurrent_tasks: None,
            default_timeout_ms: None,
        }
    }
}

impl QueueConfig {
    /// Validate queue configuration values.
    ///
    /// # Errors
    ///
    /// Describes the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        if self.worker_threads == 0 {
            return Err("worker_threads must be greater than 0".into());
        }
        if self.max_concurrent_tasks == Some(0) {
            return Err("max_concurrent_tasks must be greater than 0 when set".into());
        }
        if self.default_timeout_ms == Some(0) {
            return Err("default_timeout_ms must be greater than 0 when set".into());
        }
        Ok(())
    }

    /// Parse queue configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns the parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read configuration from `GATED_TASKS_*` environment variables, after
    /// loading a `.env` file if one exists. Unset variables keep defaults.
    ///
    /// # Errors
    ///
    /// Returns unparsable values or a validation failure.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`QueueConfig::from_env`] with an explicit variable source.
    ///
    /// # Errors
    ///
    /// Returns unparsable values or a validation failure.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let var = |suffix: &str| lookup(&format!("{ENV_PREFIX}{suffix}"));
        let mut cfg = Self::default();
        if let Some(name) = var("QUEUE_NAME") {
            cfg.name = name;
        }
        if let Some(threads) = var("WORKER_THREADS") {
            cfg.worker_threads = parse("WORKER_THREADS", &threads)?;
        }
        if let Some(limit) = var("MAX_CONCURRENT_TASKS") {
            cfg.max_concurrent_tasks = Some(parse("MAX_CONCURRENT_TASKS", &limit)?);
        }
        if let Some(timeout) = var("DEFAULT_TIMEOUT_MS") {
            cfg.default_timeout_ms = Some(parse("DEFAULT_TIMEOUT_MS", &timeout)?);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Per-queue options derived from this configuration.
    #[must_use]
    pub fn options(&self) -> QueueOptions {
        QueueOptions {
            max_concurrent_tasks: self.max_concurrent_tasks,
            default_timeout: self.default_timeout_ms.map(Duration::from_millis),
        }
    }
}

fn parse<T: std::str::FromStr>(suffix: &str, raw: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| format!("{ENV_PREFIX}{suffix}={raw:?} invalid: {e}"))
}

/// Root configuration naming several queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Map of queue name to configuration.
    pub queues: HashMap<String, QueueConfig>,
}

impl SchedulerConfig {
    /// Validate all queues and ensure at least one exists.
    ///
    /// # Errors
    ///
    /// Names the first invalid queue.
    pub fn validate(&self) -> Result<(), String> {
        if self.queues.is_empty() {
            return Err("at least one queue must be defined".into());
        }
        for (name, queue) in &self.queues {
            queue
                .validate()
                .map_err(|e| format!("queue `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse scheduler configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns the parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
