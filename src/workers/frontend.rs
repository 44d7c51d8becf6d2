//! Front-end worker: the user-facing sub-command prompt.
//!
//! `mate` opens a prompt that understands a small vocabulary; each word is also
//! reachable directly as `mate <word>`. Listing sub-commands look sibling
//! workers up by name through a [`WorkerDirectory`] held weakly, so the
//! front-end never keeps the supervisor alive.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Timelike;
use tracing::debug;

use crate::clock::Clock;
use crate::commands::{CommandTable, action};
use crate::console::Console;
use crate::error::WorkerError;
use crate::state;
use crate::supervisor::WorkerDirectory;
use crate::worker::{Worker, WorkerReport};
use crate::workers::tasks::DueState;
use crate::workers::{ask, reminders, tasks};

/// Worker name, also the status line tag.
pub const NAME: &str = "Mate";

/// Top-level command that opens the prompt.
pub const COMMAND: &str = "mate";

/// Words the prompt understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubCommand {
    Time,
    Workers,
    Todo,
    Reminders,
    Help,
}

impl SubCommand {
    pub const ALL: [SubCommand; 5] = [
        SubCommand::Time,
        SubCommand::Workers,
        SubCommand::Todo,
        SubCommand::Reminders,
        SubCommand::Help,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Workers => "workers",
            Self::Todo => "todo",
            Self::Reminders => "reminders",
            Self::Help => "help",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim().to_lowercase();
        Self::ALL.into_iter().find(|sub| sub.keyword() == input)
    }
}

/// The interactive front-end.
pub struct FrontendWorker {
    directory: Weak<dyn WorkerDirectory>,
    clock: Arc<dyn Clock>,
    console: Arc<dyn Console>,
}

impl FrontendWorker {
    pub fn new(
        directory: Weak<dyn WorkerDirectory>,
        clock: Arc<dyn Clock>,
        console: Arc<dyn Console>,
    ) -> Self {
        Self {
            directory,
            clock,
            console,
        }
    }

    fn out(&self, message: &str) {
        self.console.status(NAME, message);
    }

    /// Open the prompt and run one sub-command. `help` re-opens it.
    async fn prompt(&self) -> Result<(), WorkerError> {
        loop {
            let Some(line) = ask(
                self.console.as_ref(),
                NAME,
                "How may I help you? (Type 'help' for assistance)",
            )
            .await?
            else {
                return Ok(());
            };

            match SubCommand::parse(&line) {
                Some(SubCommand::Help) => self.help(),
                Some(sub) => {
                    self.answer(sub).await;
                    return Ok(());
                }
                None => {
                    debug!(input = %line, "Unrecognized sub-command");
                    self.out("I'm sorry, I didn't understand that.");
                    self.out("Ask me 'help' for a list of what I can understand.");
                    return Ok(());
                }
            }
        }
    }

    /// Run a sub-command directly, as `mate <sub>` does.
    async fn run(&self, sub: SubCommand) -> Result<(), WorkerError> {
        if sub == SubCommand::Help {
            self.help();
            return self.prompt().await;
        }
        self.answer(sub).await;
        Ok(())
    }

    async fn answer(&self, sub: SubCommand) {
        match sub {
            SubCommand::Time => self.time(),
            SubCommand::Workers => self.workers().await,
            SubCommand::Todo => self.todo().await,
            SubCommand::Reminders => self.reminders().await,
            SubCommand::Help => self.help(),
        }
    }

    fn help(&self) {
        self.out("Here's what I can understand:");
        for sub in SubCommand::ALL {
            self.console.write_line(&format!("    {}", sub.keyword()));
        }
        self.out(&format!(
            "You can also preface one of these with my name, like '{COMMAND} time'."
        ));
    }

    fn time(&self) {
        let now = self.clock.now();
        self.out(&format!(
            "It is currently {}. Or {} in 12-hour time",
            now.format("%a %b %e %H:%M:%S %Y"),
            now.format("%I:%M:%S %p")
        ));
    }

    async fn workers(&self) {
        let count = match self.directory.upgrade() {
            Some(directory) => directory.running_count().await,
            None => 0,
        };
        self.out(&format!("There are currently {count} workers running"));
    }

    /// Ask the directory for a sibling's snapshot.
    async fn sibling_report(&self, name: &str) -> Option<WorkerReport> {
        let directory = self.directory.upgrade()?;
        let worker = directory.lookup(name).await?;
        worker.report().await
    }

    async fn todo(&self) {
        let Some(WorkerReport::Tasks(tasks)) = self.sibling_report(tasks::NAME).await else {
            self.out("Sorry, it looks like the Tasks worker is not installed");
            return;
        };

        self.out("Here's your todo list:");
        for (i, task) in tasks.iter().enumerate() {
            let line = match task.due {
                DueState::Overdue(_) => format!("    {}. {}, OVERDUE!", i + 1, task.name),
                DueState::At(due) => format!(
                    "    {}. {}, due on {}",
                    i + 1,
                    task.name,
                    state::format_timestamp(due)
                ),
                DueState::NoDueDate => format!("    {}. {}", i + 1, task.name),
            };
            self.console.write_line(&line);
        }
    }

    async fn reminders(&self) {
        let Some(WorkerReport::Reminders(reminders)) =
            self.sibling_report(reminders::NAME).await
        else {
            self.out("Sorry, the Reminders worker is not running right now.");
            return;
        };

        self.out("Sure thing, here are your currently active reminders:");
        for reminder in reminders {
            self.console.write_line(&format!(
                "    {} - {}",
                reminder.name,
                reminder.at.format("%H:%M")
            ));
        }
    }
}

#[async_trait]
impl Worker for FrontendWorker {
    fn name(&self) -> &str {
        NAME
    }

    fn wake_interval(&self) -> Duration {
        Duration::ZERO
    }

    fn commands(self: Arc<Self>) -> CommandTable {
        let mut table = CommandTable::new();

        let me = Arc::clone(&self);
        table.insert(
            COMMAND,
            NAME,
            action(move || {
                let me = Arc::clone(&me);
                async move { me.prompt().await }
            }),
        );

        for sub in SubCommand::ALL {
            let me = Arc::clone(&self);
            table.insert(
                &format!("{COMMAND} {}", sub.keyword()),
                NAME,
                action(move || {
                    let me = Arc::clone(&me);
                    async move { me.run(sub).await }
                }),
            );
        }

        table
    }

    async fn on_start(&self) {
        self.out("Hello!");
        let greeting = match self.clock.now().hour() {
            h if h < 12 => "Good morning! Hope you slept well!",
            h if h < 16 => "Good afternoon! Being productive today?",
            _ => "Good evening!",
        };
        self.out(greeting);
        self.out("Type 'cmds' or 'commands' to see all available commands.");
        self.out("Type 'quit' or 'q' to exit the program.");
        self.out(&format!("Call my name ({COMMAND}) to get my attention."));
    }
}
