//! Reusable observers built on the core observer contract.

pub mod timeout;

pub use crate::core::observer::BlockObserver;
pub use timeout::TimeoutObserver;
