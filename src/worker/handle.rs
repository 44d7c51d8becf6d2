//! Worker handle and the per-worker run loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::commands::{CommandAction, CommandTable};
use crate::console::Console;
use crate::error::WorkerError;
use crate::worker::Worker;

/// Why a worker's inter-cycle wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    /// The wake interval elapsed.
    Timeout,
    /// `request_stop()` was called on this worker.
    Stop,
    /// The process-wide shutdown signal fired.
    Shutdown,
}

/// Owns a worker's private command table, its stop signal and its task.
pub struct WorkerHandle {
    worker: Arc<dyn Worker>,
    name: String,
    commands: Mutex<CommandTable>,
    started: AtomicBool,
    stop: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    /// Wrap a worker, collecting the commands it contributes.
    pub fn new(worker: Arc<dyn Worker>) -> Self {
        let name = worker.name().to_string();
        let commands = Arc::clone(&worker).commands();
        Self {
            worker,
            name,
            commands: Mutex::new(commands),
            started: AtomicBool::new(false),
            stop: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The wrapped worker, for snapshot queries.
    pub fn worker(&self) -> &Arc<dyn Worker> {
        &self.worker
    }

    /// Add a command before the worker starts.
    ///
    /// Only affects a standalone handle: `Supervisor::add_worker` copies the
    /// table when the handle is registered, so later calls never reach the
    /// merged namespace. Workers normally contribute through
    /// [`Worker::commands`].
    pub fn register(&self, command: &str, action: CommandAction) -> Result<(), WorkerError> {
        if self.started.load(Ordering::SeqCst) {
            return Err(WorkerError::RegisterAfterStart {
                name: self.name.clone(),
                command: command.to_string(),
            });
        }
        if let Ok(mut commands) = self.commands.lock() {
            commands.insert(command, &self.name, action);
        }
        Ok(())
    }

    /// A copy of this worker's command table.
    pub fn commands(&self) -> CommandTable {
        self.commands
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    /// Spawn the worker's task. `shutdown` is the process-wide signal: the
    /// worker observes it every cycle and cancels it on a fatal error.
    pub fn start(
        &self,
        shutdown: CancellationToken,
        console: Arc<dyn Console>,
    ) -> Result<(), WorkerError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(WorkerError::AlreadyRunning {
                name: self.name.clone(),
            });
        }

        let handle = tokio::spawn(run_worker(
            Arc::clone(&self.worker),
            self.stop.clone(),
            shutdown,
            console,
        ));

        if let Ok(mut task) = self.task.lock() {
            *task = Some(handle);
        }
        Ok(())
    }

    /// Wake the worker immediately and ask it to persist and exit.
    /// Idempotent and non-blocking.
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    pub fn has_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether the worker's task is alive.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|t| t.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Wait up to `grace` for the worker's task to finish.
    /// Returns `false` if it was still running when the grace period ended.
    pub async fn join(&self, grace: Duration) -> bool {
        let handle = match self.task.lock() {
            Ok(mut task) => task.take(),
            Err(_) => None,
        };
        let Some(handle) = handle else {
            return true;
        };

        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(worker = %self.name, "Worker task panicked: {}", e);
                true
            }
            Err(_) => {
                warn!(worker = %self.name, grace = ?grace, "Worker did not finish in time");
                false
            }
        }
    }
}

impl<W: Worker> From<Arc<W>> for WorkerHandle {
    fn from(worker: Arc<W>) -> Self {
        Self::new(worker)
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.name)
            .field("started", &self.has_started())
            .finish_non_exhaustive()
    }
}

/// The worker lifecycle: load, greet, then tick and wait until told to stop.
/// Every exit path goes through `persist`.
async fn run_worker(
    worker: Arc<dyn Worker>,
    stop: CancellationToken,
    shutdown: CancellationToken,
    console: Arc<dyn Console>,
) {
    let name = worker.name().to_string();
    let interval = worker.wake_interval();
    info!(worker = %name, interval = ?interval, "Worker starting");

    if let Err(e) = worker.load_state().await {
        warn!(worker = %name, error = %e, "Failed to load state, starting empty");
        console.status(&name, &format!("Could not load saved state ({e}). Starting fresh."));
    }

    worker.on_start().await;

    loop {
        if shutdown.is_cancelled() || stop.is_cancelled() {
            debug!(worker = %name, "Shutdown observed before tick");
            break;
        }

        if let Err(e) = worker.tick().await {
            error!(
                worker = %name,
                error = %e,
                "Periodic action failed; stopping all workers"
            );
            console.status(&name, &format!("ERROR in worker {name}: '{e}'"));
            console.status(&name, "Saving state and shutting everything down.");
            shutdown.cancel();
            break;
        }

        match wait_for_wake(interval, &stop, &shutdown).await {
            Wake::Timeout => continue,
            wake => {
                debug!(worker = %name, wake = ?wake, "Worker woken to exit");
                console.status(
                    &name,
                    &format!("Worker closing at {}", Local::now().format("%a %b %e %H:%M:%S %Y")),
                );
                break;
            }
        }
    }

    persist(worker.as_ref(), &name, console.as_ref()).await;
    info!(worker = %name, "Worker stopped");
}

async fn wait_for_wake(
    interval: Duration,
    stop: &CancellationToken,
    shutdown: &CancellationToken,
) -> Wake {
    if interval.is_zero() {
        tokio::select! {
            biased;
            _ = stop.cancelled() => Wake::Stop,
            _ = shutdown.cancelled() => Wake::Shutdown,
        }
    } else {
        tokio::select! {
            biased;
            _ = stop.cancelled() => Wake::Stop,
            _ = shutdown.cancelled() => Wake::Shutdown,
            _ = tokio::time::sleep(interval) => Wake::Timeout,
        }
    }
}

async fn persist(worker: &dyn Worker, name: &str, console: &dyn Console) {
    match worker.save_state().await {
        Ok(()) => debug!(worker = %name, "State saved"),
        Err(e) => {
            error!(worker = %name, error = %e, "Failed to save state");
            console.status(name, &format!("Could not save state: {e}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use crate::commands::action;
    use crate::console::ScriptedConsole;

    const TEST_TIMEOUT: Duration = Duration::from_secs(2);

    /// Counts hook calls; optionally fails on a given tick.
    struct Tally {
        name: String,
        interval: Duration,
        fail_on_tick: Option<usize>,
        loads: AtomicUsize,
        ticks: AtomicUsize,
        saves: AtomicUsize,
    }

    impl Tally {
        fn new(name: &str, interval: Duration) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                interval,
                fail_on_tick: None,
                loads: AtomicUsize::new(0),
                ticks: AtomicUsize::new(0),
                saves: AtomicUsize::new(0),
            })
        }

        fn failing(name: &str, on_tick: usize) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                interval: Duration::from_millis(10),
                fail_on_tick: Some(on_tick),
                loads: AtomicUsize::new(0),
                ticks: AtomicUsize::new(0),
                saves: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Worker for Tally {
        fn name(&self) -> &str {
            &self.name
        }

        fn wake_interval(&self) -> Duration {
            self.interval
        }

        async fn load_state(&self) -> Result<(), WorkerError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn save_state(&self) -> Result<(), WorkerError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn tick(&self) -> Result<(), WorkerError> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on_tick == Some(n) {
                return Err(WorkerError::Tick {
                    name: self.name.clone(),
                    reason: "disk on fire".to_string(),
                });
            }
            Ok(())
        }
    }

    fn console() -> Arc<ScriptedConsole> {
        Arc::new(ScriptedConsole::open())
    }

    #[tokio::test]
    async fn stop_interrupts_long_wait_and_saves() {
        let tally = Tally::new("Tally", Duration::from_secs(3600));
        let handle = WorkerHandle::from(Arc::clone(&tally));
        let console = console();
        handle
            .start(CancellationToken::new(), console.clone())
            .unwrap();

        // Let the first tick run, then stop mid-wait.
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.request_stop();

        assert!(handle.join(TEST_TIMEOUT).await, "worker should exit promptly");
        assert_eq!(tally.loads.load(Ordering::SeqCst), 1);
        assert_eq!(tally.ticks.load(Ordering::SeqCst), 1);
        assert_eq!(tally.saves.load(Ordering::SeqCst), 1);
        assert!(console.saw("[Tally] Worker closing at"));
    }

    #[tokio::test]
    async fn shutdown_signal_stops_worker() {
        let tally = Tally::new("Tally", Duration::from_secs(3600));
        let handle = WorkerHandle::from(Arc::clone(&tally));
        let shutdown = CancellationToken::new();
        handle.start(shutdown.clone(), console()).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        assert!(handle.join(TEST_TIMEOUT).await);
        assert_eq!(tally.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ticks_repeat_on_interval() {
        let tally = Tally::new("Fast", Duration::from_millis(10));
        let handle = WorkerHandle::from(Arc::clone(&tally));
        handle.start(CancellationToken::new(), console()).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.request_stop();
        assert!(handle.join(TEST_TIMEOUT).await);
        assert!(tally.ticks.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn zero_interval_ticks_once_then_waits() {
        let tally = Tally::new("Idle", Duration::ZERO);
        let handle = WorkerHandle::from(Arc::clone(&tally));
        handle.start(CancellationToken::new(), console()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_running());
        assert_eq!(tally.ticks.load(Ordering::SeqCst), 1);

        handle.request_stop();
        assert!(handle.join(TEST_TIMEOUT).await);
    }

    #[tokio::test]
    async fn fatal_tick_cancels_shutdown_and_saves() {
        let tally = Tally::failing("Broken", 2);
        let handle = WorkerHandle::from(Arc::clone(&tally));
        let shutdown = CancellationToken::new();
        let console = console();
        handle.start(shutdown.clone(), console.clone()).unwrap();

        tokio::time::timeout(TEST_TIMEOUT, shutdown.cancelled())
            .await
            .expect("fatal error should trigger shutdown");
        assert!(handle.join(TEST_TIMEOUT).await);

        assert_eq!(tally.ticks.load(Ordering::SeqCst), 2);
        assert_eq!(tally.saves.load(Ordering::SeqCst), 1);
        assert!(console.saw("ERROR in worker Broken"));
        assert!(console.saw("disk on fire"));
    }

    #[tokio::test]
    async fn request_stop_is_idempotent() {
        let tally = Tally::new("Twice", Duration::from_secs(3600));
        let handle = WorkerHandle::from(Arc::clone(&tally));
        handle.start(CancellationToken::new(), console()).unwrap();

        handle.request_stop();
        handle.request_stop();
        assert!(handle.join(TEST_TIMEOUT).await);
        assert_eq!(tally.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn register_rejected_after_start() {
        let tally = Tally::new("Sealed", Duration::from_secs(3600));
        let handle = WorkerHandle::from(Arc::clone(&tally));
        handle
            .register("sealed ping", action(|| async { Ok(()) }))
            .unwrap();
        assert!(handle.commands().contains("sealed ping"));

        handle.start(CancellationToken::new(), console()).unwrap();
        let err = handle
            .register("sealed pong", action(|| async { Ok(()) }))
            .unwrap_err();
        assert!(matches!(err, WorkerError::RegisterAfterStart { .. }));
        assert!(!handle.commands().contains("sealed pong"));

        let err = handle.start(CancellationToken::new(), console()).unwrap_err();
        assert!(matches!(err, WorkerError::AlreadyRunning { .. }));

        handle.request_stop();
        assert!(handle.join(TEST_TIMEOUT).await);
    }

    /// Fails to load and to save, but ticks fine.
    struct Unpersistable {
        ticks: AtomicUsize,
    }

    #[async_trait]
    impl Worker for Unpersistable {
        fn name(&self) -> &str {
            "Leaky"
        }

        fn wake_interval(&self) -> Duration {
            Duration::from_millis(10)
        }

        async fn load_state(&self) -> Result<(), WorkerError> {
            Err(WorkerError::Tick {
                name: "Leaky".to_string(),
                reason: "state unreadable".to_string(),
            })
        }

        async fn save_state(&self) -> Result<(), WorkerError> {
            Err(WorkerError::Tick {
                name: "Leaky".to_string(),
                reason: "disk full".to_string(),
            })
        }

        async fn tick(&self) -> Result<(), WorkerError> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn load_and_save_failures_are_reported_not_fatal() {
        let worker = Arc::new(Unpersistable {
            ticks: AtomicUsize::new(0),
        });
        let handle = WorkerHandle::from(Arc::clone(&worker));
        let shutdown = CancellationToken::new();
        let console = console();
        handle.start(shutdown.clone(), console.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_running());
        assert!(worker.ticks.load(Ordering::SeqCst) >= 2);
        assert!(console.saw("[Leaky] Could not load saved state"));
        assert!(!shutdown.is_cancelled());

        handle.request_stop();
        assert!(handle.join(TEST_TIMEOUT).await);
        assert!(console.saw("[Leaky] Could not save state"));
        assert!(console.saw("disk full"));
        assert!(!shutdown.is_cancelled());
    }
}
