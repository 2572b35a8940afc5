//! # Gated Tasks
//!
//! A cooperative task-scheduling layer for application work that must wait
//! on other work, on asynchronous preconditions, or on exclusive access to
//! a shared resource such as "the one alert on screen".
//!
//! ## Concepts
//!
//! - [`Task`](core::Task): a unit of work with an explicit lifecycle,
//!   dependencies, conditions and observers.
//! - [`Condition`](core::Condition): an async predicate evaluated after the
//!   dependencies finish. A condition may inject a setup task (for example
//!   "ask for permission") and may be flagged mutually exclusive.
//! - [`Observer`](core::Observer): start/produce/finish callbacks.
//! - [`ExclusivityController`](core::ExclusivityController): serializes
//!   tasks that share an exclusivity category.
//! - [`TaskQueue`](core::TaskQueue): wires all of the above and hands task
//!   drivers to the runtime.
//!
//! Composite building blocks live in [`tasks`], [`conditions`] and
//! [`observers`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use gated_tasks::builders::build_queue;
//! use gated_tasks::conditions::MutuallyExclusive;
//! use gated_tasks::config::QueueConfig;
//! use gated_tasks::core::Task;
//! use gated_tasks::observers::TimeoutObserver;
//!
//! let queue = build_queue(&QueueConfig::from_env()?)?;
//!
//! let alert = Task::from_fn("show-alert", |_| async {
//!     present_alert().await;
//!     Ok(())
//! });
//! alert.add_condition(MutuallyExclusive::named("Alert"))?;
//! alert.add_observer(TimeoutObserver::new(Duration::from_secs(30)))?;
//! queue.submit(&alert)?;
//! alert.finished().await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Builders to construct queues from configuration.
pub mod builders;
/// Reusable conditions.
pub mod conditions;
/// Configuration models for queues.
pub mod config;
/// Task, condition, observer, exclusivity and queue primitives.
pub mod core;
/// Reusable observers.
pub mod observers;
/// Runtime adapters.
pub mod runtime;
/// Composite tasks.
pub mod tasks;
/// Shared utilities.
pub mod util;
