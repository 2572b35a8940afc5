//! Reusable conditions built on the core condition contract.

pub mod mutually_exclusive;
pub mod negated;
pub mod no_cancelled;
pub mod signal;

pub use mutually_exclusive::MutuallyExclusive;
pub use negated::NegatedCondition;
pub use no_cancelled::NoCancelledDependencies;
pub use signal::{ExternalSignal, SignalCondition};
