//! Supervisor: owns the workers, the merged command table and the shutdown
//! signal, and runs the foreground command loop.
//!
//! Command actions are awaited inline on the foreground task. An action that
//! prompts for input blocks the command loop only; workers keep ticking.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::commands::{CommandTable, action, normalize};
use crate::console::Console;
use crate::error::WorkerError;
use crate::worker::{Worker, WorkerHandle};

/// Status line tag for the supervisor itself.
pub const MAIN_TAG: &str = "Main";

/// Built-in commands that stop the assistant.
pub const QUIT_COMMANDS: &[&str] = &["q", "quit"];

/// Built-in commands that list the command namespace.
pub const LIST_COMMANDS: &[&str] = &["cmds", "commands"];

/// Non-owning view of the running workers, handed to workers that need to
/// query their siblings.
#[async_trait]
pub trait WorkerDirectory: Send + Sync {
    /// Find a worker by name.
    async fn lookup(&self, name: &str) -> Option<Arc<dyn Worker>>;

    /// Number of workers whose task is alive.
    async fn running_count(&self) -> usize;
}

/// Owner of the worker set.
pub struct Supervisor {
    console: Arc<dyn Console>,
    workers: RwLock<Vec<Arc<WorkerHandle>>>,
    commands: RwLock<CommandTable>,
    shutdown: Mutex<CancellationToken>,
    running: AtomicBool,
}

impl Supervisor {
    /// Create a supervisor with the built-in commands registered.
    pub fn new(console: Arc<dyn Console>) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| {
            let mut commands = CommandTable::new();

            for name in QUIT_COMMANDS {
                let me = me.clone();
                commands.insert(
                    name,
                    MAIN_TAG,
                    action(move || {
                        let me = me.clone();
                        async move {
                            if let Some(supervisor) = me.upgrade() {
                                supervisor.stop().await;
                            }
                            Ok(())
                        }
                    }),
                );
            }

            for name in LIST_COMMANDS {
                let me = me.clone();
                commands.insert(
                    name,
                    MAIN_TAG,
                    action(move || {
                        let me = me.clone();
                        async move {
                            if let Some(supervisor) = me.upgrade() {
                                supervisor.print_commands().await;
                            }
                            Ok(())
                        }
                    }),
                );
            }

            // Born stopped; `start()` arms a fresh token.
            let shutdown = CancellationToken::new();
            shutdown.cancel();

            Self {
                console,
                workers: RwLock::new(Vec::new()),
                commands: RwLock::new(commands),
                shutdown: Mutex::new(shutdown),
                running: AtomicBool::new(false),
            }
        })
    }

    fn out(&self, message: &str) {
        self.console.status(MAIN_TAG, message);
    }

    /// The current shutdown signal.
    pub fn shutdown_token(&self) -> CancellationToken {
        match self.shutdown.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Whether the supervisor is between `start()` and `stop()`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register a worker: merge its commands (last registration wins) and, if
    /// the supervisor is already running, start it right away.
    pub async fn add_worker(&self, worker: impl Into<WorkerHandle>) -> Result<(), WorkerError> {
        let handle = Arc::new(worker.into());

        {
            let mut workers = self.workers.write().await;
            if workers.iter().any(|w| w.name() == handle.name()) {
                return Err(WorkerError::DuplicateName {
                    name: handle.name().to_string(),
                });
            }
            workers.push(Arc::clone(&handle));
        }

        let replaced = self.commands.write().await.merge(&handle.commands());
        for command in &replaced {
            debug!(command = %command, worker = %handle.name(), "Command rebound");
        }
        info!(worker = %handle.name(), "Worker registered");

        if self.is_running() {
            self.out(&format!(
                "Adding worker {} at {}",
                handle.name(),
                Local::now().format("%a %b %e %H:%M:%S %Y")
            ));
            handle.start(self.shutdown_token(), Arc::clone(&self.console))?;
        }
        Ok(())
    }

    /// Arm a fresh shutdown signal and start every registered worker in
    /// registration order.
    pub async fn start_workers(&self) {
        let token = CancellationToken::new();
        match self.shutdown.lock() {
            Ok(mut shutdown) => *shutdown = token.clone(),
            Err(poisoned) => *poisoned.into_inner() = token.clone(),
        }
        self.running.store(true, Ordering::SeqCst);
        self.out(&format!(
            "Starting at {}.",
            Local::now().format("%a %b %e %H:%M:%S %Y")
        ));

        let workers = self.workers.read().await.clone();
        for worker in workers {
            self.out(&format!("Starting worker {}", worker.name()));
            if let Err(e) = worker.start(token.clone(), Arc::clone(&self.console)) {
                error!(worker = %worker.name(), error = %e, "Failed to start worker");
                self.out(&format!("Error starting worker {}.", worker.name()));
                self.out(&format!("Error text: '{e}'"));
            }
        }
    }

    /// Start the workers, then run the command loop until quit, end of input,
    /// Ctrl-C or a worker's fatal error.
    pub async fn start(&self) {
        self.start_workers().await;
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await;
    }

    /// The foreground command loop. `interrupt` resolving counts as a stop
    /// request, whether the loop is waiting for a command or a command is
    /// waiting on one of its own prompts.
    pub async fn run_until<F>(&self, interrupt: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(interrupt);
        let shutdown = self.shutdown_token();

        while self.is_running() {
            let line = tokio::select! {
                biased;
                _ = &mut interrupt => {
                    info!("Interrupted");
                    self.stop().await;
                    break;
                }
                _ = shutdown.cancelled() => {
                    warn!("Shutdown signalled by a worker");
                    self.stop().await;
                    break;
                }
                line = self.console.read_line() => line,
            };

            match line {
                Ok(Some(line)) => {
                    // Sub-prompts inside the action read the console too, so
                    // an interrupt or a fatal worker error must cut them short.
                    tokio::select! {
                        biased;
                        _ = &mut interrupt => {
                            info!(line = %line, "Interrupted during command");
                            self.stop().await;
                            break;
                        }
                        _ = shutdown.cancelled() => {
                            warn!(line = %line, "Shutdown signalled during command");
                            self.stop().await;
                            break;
                        }
                        _ = self.dispatch(&line) => {}
                    }
                }
                Ok(None) => {
                    debug!("End of input");
                    self.stop().await;
                }
                Err(e) => {
                    error!("Console read failed: {}", e);
                    self.stop().await;
                }
            }
        }
    }

    /// Run the action bound to `line`, if any. Unknown lines are ignored.
    /// Returns whether a command matched.
    pub async fn dispatch(&self, line: &str) -> bool {
        let command = self.commands.read().await.get(line).cloned();
        let Some(command) = command else {
            debug!(line = %line, "Ignoring unknown command");
            return false;
        };

        debug!(command = %normalize(line), owner = %command.owner, "Dispatching command");
        if let Err(e) = (command.action)().await {
            warn!(owner = %command.owner, error = %e, "Command failed");
            self.console
                .status(&command.owner, &format!("Command failed: {e}"));
        }
        true
    }

    /// Signal shutdown and ask every worker to stop. Does not wait for them.
    pub async fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        self.shutdown_token().cancel();

        if was_running {
            self.out("Shutting down workers.");
        }
        for worker in self.workers.read().await.iter() {
            worker.request_stop();
        }
        if was_running {
            info!("Supervisor stopped");
            self.out(&format!(
                "Ending at {}.",
                Local::now().format("%a %b %e %H:%M:%S %Y")
            ));
        }
    }

    /// All command names, sorted.
    pub async fn list_commands(&self) -> Vec<String> {
        self.commands.read().await.names()
    }

    async fn print_commands(&self) {
        self.out("Listing commands");
        for name in self.list_commands().await {
            self.console.write_line(&format!("    {name}"));
        }
        self.out("What is your command?");
    }

    /// Wait up to `grace` for every worker's task to finish so their final
    /// saves complete. Returns `false` if any worker was still running.
    pub async fn wait_for_workers(&self, grace: Duration) -> bool {
        let workers = self.workers.read().await.clone();
        let joined = futures::future::join_all(workers.iter().map(|w| w.join(grace))).await;
        joined.into_iter().all(|done| done)
    }

    /// Names of registered workers in registration order.
    pub async fn worker_names(&self) -> Vec<String> {
        self.workers
            .read()
            .await
            .iter()
            .map(|w| w.name().to_string())
            .collect()
    }
}

#[async_trait]
impl WorkerDirectory for Supervisor {
    async fn lookup(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.workers
            .read()
            .await
            .iter()
            .find(|w| w.name() == name)
            .map(|w| Arc::clone(w.worker()))
    }

    async fn running_count(&self) -> usize {
        self.workers
            .read()
            .await
            .iter()
            .filter(|w| w.is_running())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::commands::action;
    use crate::console::ScriptedConsole;

    const TEST_TIMEOUT: Duration = Duration::from_secs(2);

    /// A worker with a long interval and one command that bumps a counter.
    struct Echo {
        name: String,
        command: String,
        hits: Arc<AtomicUsize>,
        saves: AtomicUsize,
    }

    impl Echo {
        fn new(name: &str, command: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                command: command.to_string(),
                hits: Arc::new(AtomicUsize::new(0)),
                saves: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Worker for Echo {
        fn name(&self) -> &str {
            &self.name
        }

        fn wake_interval(&self) -> Duration {
            Duration::from_secs(3600)
        }

        fn commands(self: Arc<Self>) -> CommandTable {
            let mut table = CommandTable::new();
            let hits = Arc::clone(&self.hits);
            table.insert(
                &self.command,
                &self.name,
                action(move || {
                    let hits = Arc::clone(&hits);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            );
            table
        }

        async fn save_state(&self) -> Result<(), WorkerError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn builtins_are_listed_sorted() {
        let console = Arc::new(ScriptedConsole::open());
        let supervisor = Supervisor::new(console.clone());
        supervisor.add_worker(Echo::new("Echo", "echo")).await.unwrap();

        assert_eq!(
            supervisor.list_commands().await,
            vec!["cmds", "commands", "echo", "q", "quit"]
        );

        assert!(supervisor.dispatch("CMDS").await);
        assert!(console.saw("    echo"));
        assert!(console.saw("What is your command?"));
    }

    #[tokio::test]
    async fn later_worker_wins_collision() {
        let supervisor = Supervisor::new(Arc::new(ScriptedConsole::open()));
        let first = Echo::new("First", "ping");
        let second = Echo::new("Second", "ping");
        supervisor.add_worker(Arc::clone(&first)).await.unwrap();
        supervisor.add_worker(Arc::clone(&second)).await.unwrap();

        assert!(supervisor.dispatch("ping").await);
        assert_eq!(first.hits.load(Ordering::SeqCst), 0);
        assert_eq!(second.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_lines_are_ignored() {
        let console = Arc::new(ScriptedConsole::open());
        let supervisor = Supervisor::new(console.clone());
        assert!(!supervisor.dispatch("make me a sandwich").await);
        assert!(!supervisor.dispatch("").await);
        assert!(console.output().is_empty());
    }

    #[tokio::test]
    async fn duplicate_worker_name_rejected() {
        let supervisor = Supervisor::new(Arc::new(ScriptedConsole::open()));
        supervisor.add_worker(Echo::new("Echo", "a")).await.unwrap();
        let err = supervisor.add_worker(Echo::new("Echo", "b")).await.unwrap_err();
        assert!(matches!(err, WorkerError::DuplicateName { .. }));
        assert_eq!(supervisor.worker_names().await, vec!["Echo"]);
    }

    #[tokio::test]
    async fn quit_stops_workers_and_they_save() {
        let console = Arc::new(ScriptedConsole::new(["echo", "Quit"]));
        let supervisor = Supervisor::new(console.clone());
        let echo = Echo::new("Echo", "echo");
        supervisor.add_worker(Arc::clone(&echo)).await.unwrap();

        supervisor.start_workers().await;
        tokio::time::timeout(TEST_TIMEOUT, supervisor.run_until(std::future::pending()))
            .await
            .expect("loop should end on quit");

        assert!(supervisor.wait_for_workers(TEST_TIMEOUT).await);
        assert_eq!(echo.hits.load(Ordering::SeqCst), 1);
        assert_eq!(echo.saves.load(Ordering::SeqCst), 1);
        assert!(supervisor.shutdown_token().is_cancelled());
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn end_of_input_acts_as_quit() {
        let console = Arc::new(ScriptedConsole::new(Vec::<String>::new()));
        let supervisor = Supervisor::new(console.clone());
        supervisor.start_workers().await;
        tokio::time::timeout(TEST_TIMEOUT, supervisor.run_until(std::future::pending()))
            .await
            .expect("loop should end at EOF");
        assert!(console.saw("Shutting down workers."));
    }

    #[tokio::test]
    async fn interrupt_acts_as_stop() {
        let console = Arc::new(ScriptedConsole::open());
        let supervisor = Supervisor::new(console.clone());
        let echo = Echo::new("Echo", "echo");
        supervisor.add_worker(Arc::clone(&echo)).await.unwrap();
        supervisor.start_workers().await;

        tokio::time::timeout(
            TEST_TIMEOUT,
            supervisor.run_until(tokio::time::sleep(Duration::from_millis(50))),
        )
        .await
        .expect("interrupt should end the loop");

        assert!(supervisor.wait_for_workers(TEST_TIMEOUT).await);
        assert_eq!(echo.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_twice_is_harmless() {
        let console = Arc::new(ScriptedConsole::open());
        let supervisor = Supervisor::new(console.clone());
        let echo = Echo::new("Echo", "echo");
        supervisor.add_worker(Arc::clone(&echo)).await.unwrap();
        supervisor.start_workers().await;

        supervisor.stop().await;
        supervisor.stop().await;

        assert!(supervisor.wait_for_workers(TEST_TIMEOUT).await);
        assert_eq!(console.count("Shutting down workers."), 1);
        assert_eq!(console.count("Ending at"), 1);
        assert_eq!(echo.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hot_add_starts_immediately() {
        let console = Arc::new(ScriptedConsole::open());
        let supervisor = Supervisor::new(console.clone());
        supervisor.start_workers().await;

        supervisor.add_worker(Echo::new("Late", "late")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(console.saw("Adding worker Late"));
        assert_eq!(supervisor.running_count().await, 1);
        assert!(supervisor.lookup("Late").await.is_some());
        assert!(supervisor.lookup("Missing").await.is_none());

        supervisor.stop().await;
        assert!(supervisor.wait_for_workers(TEST_TIMEOUT).await);
        assert_eq!(supervisor.running_count().await, 0);
    }
}
