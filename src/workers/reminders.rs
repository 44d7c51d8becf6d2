//! Reminders worker: one-shot, same-day alarms at hour:minute.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveTime, Timelike};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::commands::{CommandTable, action};
use crate::console::Console;
use crate::error::{StateError, WorkerError};
use crate::state::{self, Record, StateFile};
use crate::worker::{Worker, WorkerReport};
use crate::workers::{ask, validate_name};

/// Worker name, also the status line tag.
pub const NAME: &str = "Reminders";

/// State file name inside the state directory.
pub const STATE_FILE: &str = "REMINDERS";

/// Default wake interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// An active reminder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    pub name: String,
    /// Time of day; seconds are always zero.
    pub at: NaiveTime,
}

/// Parse user input of the form `hr:mn`.
pub fn parse_time_of_day(input: &str) -> Result<NaiveTime, String> {
    let (hour, minute) = input
        .trim()
        .split_once(':')
        .ok_or_else(|| format!("'{input}' has no ':'"))?;
    let hour: u32 = hour
        .trim()
        .parse()
        .map_err(|_| format!("hour '{hour}' is not a number"))?;
    let minute: u32 = minute
        .trim()
        .parse()
        .map_err(|_| format!("minute '{minute}' is not a number"))?;
    NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| format!("{hour}:{minute} is not a time of day"))
}

/// Tracks reminders and fires each one once when the clock reaches it.
pub struct RemindersWorker {
    reminders: RwLock<BTreeMap<String, NaiveTime>>,
    interval: Duration,
    state: StateFile,
    clock: Arc<dyn Clock>,
    console: Arc<dyn Console>,
}

impl RemindersWorker {
    pub fn new(state: StateFile, clock: Arc<dyn Clock>, console: Arc<dyn Console>) -> Self {
        Self {
            reminders: RwLock::new(BTreeMap::new()),
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

    /// Add or replace a reminder.
    pub async fn add(&self, name: impl Into<String>, at: NaiveTime) {
        let at = truncate_to_minute(at);
        self.reminders.write().await.insert(name.into(), at);
    }

    /// Snapshot of the active reminders, ordered by name.
    pub async fn reminders(&self) -> Vec<Reminder> {
        self.reminders
            .read()
            .await
            .iter()
            .map(|(name, at)| Reminder {
                name: name.clone(),
                at: *at,
            })
            .collect()
    }

    fn out(&self, message: &str) {
        self.console.status(NAME, message);
    }

    /// `reminders add`: prompt for a name and a time, then persist.
    async fn add_interactive(&self) -> Result<(), WorkerError> {
        self.out("Adding reminder...");
        let Some(name) = ask(self.console.as_ref(), NAME, "Name?").await? else {
            self.out("Cancelled.");
            return Ok(());
        };
        if let Err(reason) = validate_name(&name) {
            self.out(&format!("Bad name: {reason}"));
            return Ok(());
        }

        let Some(raw) = ask(self.console.as_ref(), NAME, "Time? ('hr:mn')").await? else {
            self.out("Cancelled.");
            return Ok(());
        };
        let at = match parse_time_of_day(&raw) {
            Ok(at) => at,
            Err(reason) => {
                self.out(&format!("Bad time format ('hr:mn'): {reason}"));
                return Ok(());
            }
        };

        self.add(name.clone(), at).await;
        info!(reminder = %name, at = %at, "Reminder added");
        self.out(&format!("Reminder '{}' added at {}.", name, at.format("%H:%M")));
        self.save_state().await
    }

    /// `reminders list`: print every reminder as `name - HH:MM`.
    async fn list(&self) -> Result<(), WorkerError> {
        self.out("Listing reminders...");
        for reminder in self.reminders().await {
            self.console
                .write_line(&format!("    {} - {}", reminder.name, reminder.at.format("%H:%M")));
        }
        Ok(())
    }
}

#[async_trait]
impl Worker for RemindersWorker {
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
            "reminders add",
            NAME,
            action(move || {
                let me = Arc::clone(&me);
                async move { me.add_interactive().await }
            }),
        );

        let me = Arc::clone(&self);
        table.insert(
            "reminders list",
            NAME,
            action(move || {
                let me = Arc::clone(&me);
                async move { me.list().await }
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
            match parse_record(&self.state, line, &record) {
                Ok(at) => {
                    loaded.insert(record.key, at);
                }
                Err(e) => warn!(error = %e, "Skipping reminder record"),
            }
        }

        debug!(count = loaded.len(), "Loaded reminders");
        *self.reminders.write().await = loaded;
        Ok(())
    }

    async fn save_state(&self) -> Result<(), WorkerError> {
        let today = self.clock.now().date();
        let records: Vec<Record> = self
            .reminders
            .read()
            .await
            .iter()
            .map(|(name, at)| {
                Record::new(name.clone(), Some(state::format_timestamp(today.and_time(*at))))
            })
            .collect();
        self.state.save(&records).await?;
        Ok(())
    }

    async fn tick(&self) -> Result<(), WorkerError> {
        let now = self.clock.now().time();
        let mut reminders = self.reminders.write().await;

        let due: Vec<String> = reminders
            .iter()
            .filter(|(_, at)| at.hour() == now.hour() && at.minute() == now.minute())
            .map(|(name, _)| name.clone())
            .collect();

        for name in due {
            reminders.remove(&name);
            info!(reminder = %name, "Reminder fired");
            self.out(&format!("===={name}!===="));
        }
        Ok(())
    }

    async fn report(&self) -> Option<WorkerReport> {
        Some(WorkerReport::Reminders(self.reminders().await))
    }
}

fn parse_record(file: &StateFile, line: usize, record: &Record) -> Result<NaiveTime, StateError> {
    let value = record.value.as_deref().ok_or_else(|| StateError::Malformed {
        path: file.path().to_path_buf(),
        line,
        reason: format!("reminder '{}' has no time", record.key),
    })?;
    let ts = state::parse_timestamp(value, file.path(), line)?;
    Ok(truncate_to_minute(ts.time()))
}

fn truncate_to_minute(at: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(at.hour(), at.minute(), 0).unwrap_or(at)
}
