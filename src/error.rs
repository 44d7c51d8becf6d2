//! Error types for deskmate.

use std::path::PathBuf;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Worker lifecycle and periodic-action errors.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker {name} is already running")]
    AlreadyRunning { name: String },

    #[error("A worker named {name} is already registered")]
    DuplicateName { name: String },

    #[error("Worker {name} has started, command '{command}' can no longer be registered")]
    RegisterAfterStart { name: String, command: String },

    #[error("Worker {name} periodic action failed: {reason}")]
    Tick { name: String, reason: String },

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Console error: {0}")]
    Console(#[from] ConsoleError),
}

/// Persisted state file errors.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record in {path} at line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// Interactive console errors.
#[derive(Debug, thiserror::Error)]
pub enum ConsoleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Console input closed")]
    Closed,
}
