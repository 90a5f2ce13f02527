//! Conversion of provider commands into wire commands.
//!
//! Commands with arguments never cross the channel. They are parked in a
//! delegation cache and replaced by [`DELEGATING_COMMAND_ID`] plus a cache
//! key; the entry lives as long as the owning node's [`DisposableStore`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};

use crate::disposable::DisposableStore;
use crate::types::{Command, CommandDto};

pub const DELEGATING_COMMAND_ID: &str = "_internal_command_delegation";

#[derive(Default)]
pub struct CommandsConverter {
    next_id: AtomicU64,
    cache: Arc<Mutex<FxHashMap<u64, Command>>>,
}

impl CommandsConverter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_internal(&self, command: &Command, disposables: &DisposableStore) -> CommandDto {
        if command.arguments.is_empty() {
            return CommandDto {
                id: command.command.clone(),
                title: command.title.clone(),
                tooltip: command.tooltip.clone(),
                arguments: None,
            };
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.cache.lock().insert(id, command.clone());
        let cache = Arc::clone(&self.cache);
        disposables.add(move || {
            cache.lock().remove(&id);
        });
        CommandDto {
            id: DELEGATING_COMMAND_ID.to_string(),
            title: command.title.clone(),
            tooltip: command.tooltip.clone(),
            arguments: Some(vec![json!(id)]),
        }
    }

    /// Recovers the provider command behind a wire command.
    ///
    /// `None` when the delegation entry was already disposed.
    #[must_use]
    pub fn from_internal(&self, command: &CommandDto) -> Option<Command> {
        if command.id != DELEGATING_COMMAND_ID {
            return Some(Command {
                command: command.id.clone(),
                title: command.title.clone(),
                tooltip: command.tooltip.clone(),
                arguments: command.arguments.clone().unwrap_or_default(),
            });
        }
        let id = command
            .arguments
            .as_deref()
            .and_then(<[Value]>::first)
            .and_then(Value::as_u64)?;
        self.cache.lock().get(&id).cloned()
    }

    /// Number of parked commands.
    #[must_use]
    pub fn delegated(&self) -> usize {
        self.cache.lock().len()
    }
}
