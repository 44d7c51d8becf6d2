//! Worker framework: periodic background execution with persisted state.
//!
//! Core components:
//! - `worker`: the `Worker` capability trait and `WorkerReport` snapshots
//! - `handle`: `WorkerHandle`: command registration, start/stop, the run loop

pub mod handle;
pub mod worker;

pub use handle::WorkerHandle;
pub use worker::{Worker, WorkerReport};
