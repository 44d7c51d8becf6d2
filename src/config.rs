//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Assistant configuration.
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    /// Directory holding per-worker state files and the rolling log.
    pub state_dir: PathBuf,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Reminders wake interval.
    pub reminders_interval: Duration,
    /// Tasks wake interval.
    pub tasks_interval: Duration,
    /// How long the binary waits for workers to persist after the command loop ends.
    pub shutdown_grace: Duration,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            log_filter: "info".to_string(),
            reminders_interval: Duration::from_secs(5),
            tasks_interval: Duration::from_secs(30 * 60), // 30 minutes
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl AssistantConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let state_dir = std::env::var("DESKMATE_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.state_dir);

        let log_filter = std::env::var("DESKMATE_LOG").unwrap_or(defaults.log_filter);

        let reminders_interval =
            secs_from_env("DESKMATE_REMINDERS_INTERVAL_SECS")?.unwrap_or(defaults.reminders_interval);
        let tasks_interval =
            secs_from_env("DESKMATE_TASKS_INTERVAL_SECS")?.unwrap_or(defaults.tasks_interval);
        let shutdown_grace =
            secs_from_env("DESKMATE_SHUTDOWN_GRACE_SECS")?.unwrap_or(defaults.shutdown_grace);

        Ok(Self {
            state_dir,
            log_filter,
            reminders_interval,
            tasks_interval,
            shutdown_grace,
        })
    }

    /// Path of a worker's state file inside the state directory.
    pub fn state_file(&self, file_name: &str) -> PathBuf {
        self.state_dir.join(file_name)
    }

    /// Ensure the state directory exists.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.state_dir)?;
        Ok(())
    }
}

fn default_state_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".deskmate")
}

fn secs_from_env(key: &str) -> Result<Option<Duration>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => parse_secs(key, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_secs(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected whole seconds, got '{raw}': {e}"),
        })
}
