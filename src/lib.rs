//! deskmate: a small terminal assistant built from cooperating workers.
//!
//! A [`supervisor::Supervisor`] owns a set of workers, each running on its own
//! task with its own wake interval, and a foreground command loop that routes
//! typed lines to the commands those workers register.

pub mod clock;
pub mod commands;
pub mod config;
pub mod console;
pub mod error;
pub mod logging;
pub mod state;
pub mod supervisor;
pub mod worker;
pub mod workers;
