//! The `Worker` capability trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::commands::CommandTable;
use crate::error::WorkerError;
use crate::workers::reminders::Reminder;
use crate::workers::tasks::Task;

/// Read-only snapshot a worker hands to its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerReport {
    Reminders(Vec<Reminder>),
    Tasks(Vec<Task>),
}

/// A unit of cooperative background execution.
///
/// Every hook has a no-op default, so a worker only overrides what it needs.
/// The lifecycle driven by [`WorkerHandle`](super::WorkerHandle) is:
/// `load_state` → `on_start` → (`tick` → wait)* → `save_state`.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Unique, immutable name. Also used as the status line tag.
    fn name(&self) -> &str;

    /// Time between ticks. Zero means event-driven: one tick at start, then
    /// the worker only waits for a stop signal.
    fn wake_interval(&self) -> Duration;

    /// Commands this worker contributes to the shared namespace.
    fn commands(self: Arc<Self>) -> CommandTable {
        CommandTable::new()
    }

    /// Restore persisted state. A missing file is a first run, not an error.
    async fn load_state(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Persist state as a full rewrite.
    async fn save_state(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Runs once after `load_state`, before the first tick.
    async fn on_start(&self) {}

    /// Periodic action. An error here stops every worker in the process.
    async fn tick(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    /// Snapshot accessor for sibling workers.
    async fn report(&self) -> Option<WorkerReport> {
        None
    }
}
