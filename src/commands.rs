//! Command table: command string → zero-argument async action.
//!
//! Keys are stored normalized (trimmed, lowercased), so lookups are
//! case-insensitive exact matches against a whole input line.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::WorkerError;

/// Future returned by a command action.
pub type CommandFuture = BoxFuture<'static, Result<(), WorkerError>>;

/// A zero-argument command action.
pub type CommandAction = Arc<dyn Fn() -> CommandFuture + Send + Sync>;

/// Wrap an async closure as a [`CommandAction`].
pub fn action<F, Fut>(f: F) -> CommandAction
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
{
    Arc::new(move || Box::pin(f()))
}

/// Normalize a command string or input line for matching.
pub fn normalize(command: &str) -> String {
    command.trim().to_lowercase()
}

/// A bound command and the name of whoever registered it.
#[derive(Clone)]
pub struct Command {
    pub owner: String,
    pub action: CommandAction,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// Mapping from command string to action.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    commands: HashMap<String, Command>,
}

impl CommandTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `action`, returning the binding it replaced.
    pub fn insert(&mut self, name: &str, owner: &str, action: CommandAction) -> Option<Command> {
        self.commands.insert(
            normalize(name),
            Command {
                owner: owner.to_string(),
                action,
            },
        )
    }

    /// Look up a command by an input line.
    pub fn get(&self, line: &str) -> Option<&Command> {
        self.commands.get(&normalize(line))
    }

    /// Check if a command exists.
    pub fn contains(&self, line: &str) -> bool {
        self.get(line).is_some()
    }

    /// Copy every binding from `other` into this table. Colliding names are
    /// overwritten (last registration wins) and returned.
    pub fn merge(&mut self, other: &CommandTable) -> Vec<String> {
        let mut replaced = Vec::new();
        for (name, command) in &other.commands {
            if self.commands.insert(name.clone(), command.clone()).is_some() {
                replaced.push(name.clone());
            }
        }
        replaced.sort();
        replaced
    }

    /// All command names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }
}
