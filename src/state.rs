//! Flat per-worker state files.
//!
//! One record per line: `key` or `key|value`, where the key ends at the first
//! `|`. Saves are full rewrites through a sibling temp file and a rename, so a
//! crash mid-save never leaves a half-written file behind.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tokio::fs;

use crate::error::StateError;

/// Timestamp format written to state files. Seconds are always `:00`.
pub const TIMESTAMP_FORMAT: &str = "%B %d, %Y. %H:%M:00";

/// Format accepted when reading timestamps back.
const TIMESTAMP_PARSE_FORMAT: &str = "%B %d, %Y. %H:%M:%S";

/// Field separator between key and value.
pub const SEPARATOR: char = '|';

/// A single state file record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: Option<String>,
}

impl Record {
    pub fn new(key: impl Into<String>, value: Option<String>) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    fn parse(line: &str) -> Self {
        match line.split_once(SEPARATOR) {
            Some((key, value)) => Self::new(key, Some(value.to_string())),
            None => Self::new(line, None),
        }
    }

    fn to_line(&self) -> String {
        match &self.value {
            Some(value) => format!("{}{}{}", self.key, SEPARATOR, value),
            None => self.key.clone(),
        }
    }
}

/// Format a timestamp for a state file.
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a state file timestamp, reporting the offending line on failure.
pub fn parse_timestamp(raw: &str, path: &Path, line: usize) -> Result<NaiveDateTime, StateError> {
    NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_PARSE_FORMAT).map_err(|e| {
        StateError::Malformed {
            path: path.to_path_buf(),
            line,
            reason: format!("bad timestamp '{raw}': {e}"),
        }
    })
}

/// A worker's state file on disk.
#[derive(Debug, Clone)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all records. Returns `Ok(None)` when the file does not exist yet.
    /// Records come back with their 1-based line numbers; blank lines are skipped.
    pub async fn load(&self) -> Result<Option<Vec<(usize, Record)>>, StateError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StateError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let records = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| (i + 1, Record::parse(line.trim_end_matches('\r'))))
            .collect();

        Ok(Some(records))
    }

    /// Overwrite the file with `records`.
    pub async fn save(&self, records: &[Record]) -> Result<(), StateError> {
        let io_err = |source: std::io::Error| StateError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let mut content = String::new();
        for record in records {
            content.push_str(&record.to_line());
            content.push('\n');
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, content).await.map_err(io_err)?;
        fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}
