//! Tasks worker: todo items with an optional due date.
//!
//! Once a day before a task is due it gets a "coming up soon" nag every cycle.
//! When the due time passes it flips to overdue, which is permanent and nags
//! every cycle until the task is finished.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::commands::{CommandTable, action};
use crate::console::Console;
use crate::error::WorkerError;
use crate::state::{self, Record, StateFile};
use crate::worker::{Worker, WorkerReport};
use crate::workers::{ask, validate_name};

/// Worker name, also the status line tag.
pub const NAME: &str = "Tasks";

/// State file name inside the state directory.
pub const STATE_FILE: &str = "TASKS";

/// Default wake interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Format the user types a due date in (24-hour time).
pub const DUE_INPUT_FORMAT: &str = "%B %d, %Y. %H:%M";

/// Whole days remaining at or below which a task counts as coming up soon.
const SOON_DAYS: i64 = 1;

/// When a task is due.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueState {
    /// Due at a concrete local time, not yet passed.
    At(NaiveDateTime),
    /// Never due.
    NoDueDate,
    /// The due time (kept for persistence) has passed.
    Overdue(NaiveDateTime),
}

/// A todo item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    pub due: DueState,
}

/// Parse a due date typed by the user.
pub fn parse_due(input: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(input.trim(), DUE_INPUT_FORMAT)
}

/// Tracks todo items and nags about upcoming and missed deadlines.
pub struct TasksWorker {
    tasks: RwLock<BTreeMap<String, DueState>>,
    interval: Duration,
    state: StateFile,
    clock: Arc<dyn Clock>,
    console: Arc<dyn Console>,
}

impl TasksWorker {
    pub fn new(state: StateFile, clock: Arc<dyn Clock>, console: Arc<dyn Console>) -> Self {
        Self {
            tasks: RwLock::new(BTreeMap::new()),
            interval: DEFAULT_INTERVAL,
            state,
            clock,
            console,
        }
    }

    /// Builder: set the wake interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Add or replace a task. `None` means no due date.
    pub async fn add(&self, name: impl Into<String>, due: Option<NaiveDateTime>) {
        let due = due.map_or(DueState::NoDueDate, DueState::At);
        self.tasks.write().await.insert(name.into(), due);
    }

    /// Remove a task by exact name. Returns whether it existed.
    pub async fn finish(&self, name: &str) -> bool {
        self.tasks.write().await.remove(name).is_some()
    }

    /// Snapshot of all tasks, ordered by name.
    pub async fn tasks(&self) -> Vec<Task> {
        self.tasks
            .read()
            .await
            .iter()
            .map(|(name, due)| Task {
                name: name.clone(),
                due: *due,
            })
            .collect()
    }

    fn out(&self, message: &str) {
        self.console.status(NAME, message);
    }

    /// `tasks add`: prompt for a name, whether it has a due date, and the date.
    async fn add_interactive(&self) -> Result<(), WorkerError> {
        let console = self.console.as_ref();
        let Some(name) = ask(console, NAME, "Name?").await? else {
            self.out("Cancelling");
            return Ok(());
        };
        if let Err(reason) = validate_name(&name) {
            self.out(&format!("Bad name: {reason}"));
            return Ok(());
        }

        let has_due_date = loop {
            let Some(answer) = ask(console, NAME, "Due date? (yes/no, or cancel)").await? else {
                self.out("Cancelling");
                return Ok(());
            };
            match answer.to_lowercase().as_str() {
                "yes" => break true,
                "no" => break false,
                "cancel" => {
                    self.out("Cancelling");
                    return Ok(());
                }
                _ => continue,
            }
        };

        let due = if has_due_date {
            let Some(raw) = ask(
                console,
                NAME,
                "When? (format: 'Month DD, YYYY. HH:MM', 24-hour time)",
            )
            .await?
            else {
                self.out("Cancelling");
                return Ok(());
            };
            match parse_due(&raw) {
                Ok(due) => Some(due),
                Err(e) => {
                    debug!(input = %raw, error = %e, "Rejected due date");
                    self.out("Bad date format. Try again following the format.");
                    return Ok(());
                }
            }
        } else {
            None
        };

        self.add(name.clone(), due).await;
        info!(task = %name, due = ?due, "Task added");
        match due {
            Some(due) => self.out(&format!(
                "Added todo '{}' due {}",
                name,
                state::format_timestamp(due)
            )),
            None => self.out(&format!("Added todo '{name}' with no due date")),
        }
        self.save_state().await
    }

    /// `tasks finish`: remove a task by name.
    async fn finish_interactive(&self) -> Result<(), WorkerError> {
        let Some(name) = ask(self.console.as_ref(), NAME, "Which one did you finish?").await?
        else {
            return Ok(());
        };

        if self.finish(&name).await {
            info!(task = %name, "Task finished");
            self.out(&format!("Removed '{name}' from todo list."));
            self.save_state().await
        } else {
            self.out(&format!("There's no todo named '{name}'."));
            Ok(())
        }
    }
}

#[async_trait]
impl Worker for TasksWorker {
    fn name(&self) -> &str {
        NAME
    }

    fn wake_interval(&self) -> Duration {
        self.interval
    }

    fn commands(self: Arc<Self>) -> CommandTable {
        let mut table = CommandTable::new();

        let me = Arc::clone(&self);
        table.insert(
            "tasks add",
            NAME,
            action(move || {
                let me = Arc::clone(&me);
                async move { me.add_interactive().await }
            }),
        );

        let me = Arc::clone(&self);
        table.insert(
            "tasks finish",
            NAME,
            action(move || {
                let me = Arc::clone(&me);
                async move { me.finish_interactive().await }
            }),
        );

        table
    }

    async fn load_state(&self) -> Result<(), WorkerError> {
        let Some(records) = self.state.load().await? else {
            self.out("State file doesn't exist, clean slate.");
            return Ok(());
        };

        let mut loaded = BTreeMap::new();
        for (line, record) in records {
            let due = match record.value.as_deref() {
                None => DueState::NoDueDate,
                Some(raw) => match state::parse_timestamp(raw, self.state.path(), line) {
                    Ok(due) => DueState::At(due),
                    Err(e) => {
                        warn!(error = %e, "Skipping task record");
                        continue;
                    }
                },
            };
            loaded.insert(record.key, due);
        }

        debug!(count = loaded.len(), "Loaded tasks");
        *self.tasks.write().await = loaded;
        Ok(())
    }

    async fn save_state(&self) -> Result<(), WorkerError> {
        let records: Vec<Record> = self
            .tasks
            .read()
            .await
            .iter()
            .map(|(name, due)| match due {
                DueState::NoDueDate => Record::new(name.clone(), None),
                DueState::At(ts) | DueState::Overdue(ts) => {
                    Record::new(name.clone(), Some(state::format_timestamp(*ts)))
                }
            })
            .collect();
        self.state.save(&records).await?;
        Ok(())
    }

    async fn tick(&self) -> Result<(), WorkerError> {
        let now = self.clock.now();
        let mut tasks = self.tasks.write().await;

        for (name, due) in tasks.iter_mut() {
            let current = *due;
            match current {
                DueState::NoDueDate => {}
                DueState::Overdue(_) => {
                    self.out(&format!("You missed a deadline! {name} is overdue!"));
                }
                DueState::At(when) if now > when => {
                    *due = DueState::Overdue(when);
                    info!(task = %name, "Task became overdue");
                    self.out(&format!("{name} is due NOW!"));
                }
                DueState::At(when) => {
                    if (when - now).num_days() <= SOON_DAYS {
                        self.out(&format!(
                            "Todo '{}' is coming up soon! Due date: {}",
                            name,
                            state::format_timestamp(when)
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    async fn report(&self) -> Option<WorkerReport> {
        Some(WorkerReport::Tasks(self.tasks().await))
    }
}
