//! Line-oriented console I/O.
//!
//! - [`StdConsole`] reads stdin on a background thread and prints to stdout.
//! - [`ScriptedConsole`] replays queued input lines and records output, for
//!   tests and demos.
//!
//! Every notable event is printed as a status line: `[HH:MM:SS] [Tag] message`.

use std::io::BufRead;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Local, NaiveTime};
use tokio::sync::mpsc;

use crate::error::ConsoleError;

/// Format a timestamped, tagged status line.
pub fn format_status(at: NaiveTime, tag: &str, message: &str) -> String {
    format!("[{}] [{}] {}", at.format("%H:%M:%S"), tag, message)
}

/// Interactive text I/O used by the supervisor loop and by command actions.
#[async_trait]
pub trait Console: Send + Sync {
    /// Read one line of input. `Ok(None)` means end of input.
    async fn read_line(&self) -> Result<Option<String>, ConsoleError>;

    /// Write one raw line of output.
    fn write_line(&self, line: &str);

    /// Write a timestamped status line tagged with `tag`.
    fn status(&self, tag: &str, message: &str) {
        self.write_line(&format_status(Local::now().time(), tag, message));
    }

    /// Print `question` as a status line and read the answer.
    /// End of input is reported as [`ConsoleError::Closed`].
    async fn prompt(&self, tag: &str, question: &str) -> Result<String, ConsoleError> {
        self.status(tag, question);
        match self.read_line().await? {
            Some(line) => Ok(line.trim().to_string()),
            None => Err(ConsoleError::Closed),
        }
    }
}

/// Stdin/stdout console.
pub struct StdConsole {
    lines: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<String, std::io::Error>>>,
}

impl StdConsole {
    /// Create the console and spawn the stdin reader.
    ///
    /// The reader is a detached OS thread: a blocked read must not hold the
    /// runtime open at exit.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Error reading stdin: {}", e);
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        });

        Self {
            lines: tokio::sync::Mutex::new(rx),
        }
    }
}

impl Default for StdConsole {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Console for StdConsole {
    async fn read_line(&self) -> Result<Option<String>, ConsoleError> {
        match self.lines.lock().await.recv().await {
            Some(Ok(line)) => Ok(Some(line)),
            Some(Err(e)) => Err(ConsoleError::Io(e)),
            None => Ok(None),
        }
    }

    fn write_line(&self, line: &str) {
        println!("{line}");
    }
}

/// Console fed from a queue of lines, recording everything written.
pub struct ScriptedConsole {
    input_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    input_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    output: Mutex<Vec<String>>,
}

impl ScriptedConsole {
    /// A console that replays `lines`, then reports end of input.
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let console = Self::open();
        for line in lines {
            console.feed(line);
        }
        console.close();
        console
    }

    /// A console with no input yet that stays open until [`close`](Self::close).
    pub fn open() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            input_tx: Mutex::new(Some(tx)),
            input_rx: tokio::sync::Mutex::new(rx),
            output: Mutex::new(Vec::new()),
        }
    }

    /// Queue another input line. Ignored once closed.
    pub fn feed(&self, line: impl Into<String>) {
        if let Ok(guard) = self.input_tx.lock()
            && let Some(tx) = guard.as_ref()
        {
            let _ = tx.send(line.into());
        }
    }

    /// Signal end of input after the queued lines.
    pub fn close(&self) {
        if let Ok(mut guard) = self.input_tx.lock() {
            guard.take();
        }
    }

    /// Everything written so far.
    pub fn output(&self) -> Vec<String> {
        self.output.lock().map(|o| o.clone()).unwrap_or_default()
    }

    /// Whether any written line contains `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        self.output().iter().any(|line| line.contains(needle))
    }

    /// Number of written lines containing `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.output().iter().filter(|line| line.contains(needle)).count()
    }
}

#[async_trait]
impl Console for ScriptedConsole {
    async fn read_line(&self) -> Result<Option<String>, ConsoleError> {
        Ok(self.input_rx.lock().await.recv().await)
    }

    fn write_line(&self, line: &str) {
        if let Ok(mut output) = self.output.lock() {
            output.push(line.to_string());
        }
    }
}
