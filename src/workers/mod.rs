//! Concrete workers.
//!
//! - `reminders`: same-day hour:minute reminders, fired once
//! - `tasks`: todo items with an optional due date
//! - `frontend`: the interactive sub-command prompt

pub mod frontend;
pub mod reminders;
pub mod tasks;

pub use frontend::FrontendWorker;
pub use reminders::RemindersWorker;
pub use tasks::TasksWorker;

use crate::console::Console;
use crate::error::{ConsoleError, WorkerError};
use crate::state::SEPARATOR;

/// Prompt for an answer. End of input reads as "cancelled" (`Ok(None)`).
pub(crate) async fn ask(
    console: &dyn Console,
    tag: &str,
    question: &str,
) -> Result<Option<String>, WorkerError> {
    match console.prompt(tag, question).await {
        Ok(answer) => Ok(Some(answer)),
        Err(ConsoleError::Closed) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Check a user-supplied item name can be stored as a state file key.
pub(crate) fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("name cannot be empty".to_string());
    }
    if name.contains(SEPARATOR) {
        return Err(format!("name cannot contain '{SEPARATOR}'"));
    }
    Ok(())
}
