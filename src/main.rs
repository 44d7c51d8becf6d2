use std::sync::Arc;

use deskmate::clock::{Clock, SystemClock};
use deskmate::config::AssistantConfig;
use deskmate::console::{Console, StdConsole};
use deskmate::logging;
use deskmate::state::StateFile;
use deskmate::supervisor::{Supervisor, WorkerDirectory};
use deskmate::workers::{FrontendWorker, RemindersWorker, TasksWorker, reminders, tasks};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AssistantConfig::from_env()?;
    config.ensure_dirs()?;

    // Flushes the rolling log on drop
    let _guard = logging::init(&config.state_dir, &config.log_filter);

    tracing::info!(
        state_dir = %config.state_dir.display(),
        reminders_interval = ?config.reminders_interval,
        tasks_interval = ?config.tasks_interval,
        "Starting deskmate"
    );

    let console: Arc<dyn Console> = Arc::new(StdConsole::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let supervisor = Supervisor::new(Arc::clone(&console));

    let reminders = RemindersWorker::new(
        StateFile::new(config.state_file(reminders::STATE_FILE)),
        Arc::clone(&clock),
        Arc::clone(&console),
    )
    .with_interval(config.reminders_interval);
    supervisor.add_worker(Arc::new(reminders)).await?;

    let tasks = TasksWorker::new(
        StateFile::new(config.state_file(tasks::STATE_FILE)),
        Arc::clone(&clock),
        Arc::clone(&console),
    )
    .with_interval(config.tasks_interval);
    supervisor.add_worker(Arc::new(tasks)).await?;

    let directory: Arc<dyn WorkerDirectory> = supervisor.clone();
    let frontend = FrontendWorker::new(Arc::downgrade(&directory), clock, console);
    supervisor.add_worker(Arc::new(frontend)).await?;

    supervisor.start().await;

    if !supervisor.wait_for_workers(config.shutdown_grace).await {
        tracing::warn!(
            grace = ?config.shutdown_grace,
            "Some workers did not finish saving before the grace period ran out"
        );
    }

    tracing::info!("deskmate stopped");
    Ok(())
}
