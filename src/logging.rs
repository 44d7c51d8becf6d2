//! Tracing setup.
//!
//! Diagnostics go to a daily rolling file in the state directory so they never
//! interleave with the status lines printed on the console.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// File name prefix of the rolling log.
pub const LOG_FILE_PREFIX: &str = "deskmate.log";

/// Install the global subscriber. Keep the returned guard alive for the process
/// lifetime or buffered lines are lost on exit.
pub fn init(log_dir: &Path, default_filter: &str) -> WorkerGuard {
    let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .init();

    guard
}
