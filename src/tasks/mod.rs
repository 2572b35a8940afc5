//! Composite tasks built from the core primitives.

pub mod delay;
pub mod group;

pub use delay::{Delay, DelayTask};
pub use group::GroupTask;
