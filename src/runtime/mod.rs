//! Runtime adapters: where task drivers actually run.

pub mod tokio_spawner;

pub use tokio_spawner::{Spawn, TokioSpawner};
