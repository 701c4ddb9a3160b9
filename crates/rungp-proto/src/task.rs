//! Tasks reported by the in-workspace supervisor.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task as reported by the status feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// The task's terminal is being created. Not acted upon.
    Opening,
    Running,
    Closed,
}

/// One task in a status snapshot. The supervisor never mutates these; it
/// only reacts to state changes between snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub id: String,
    /// Display name from the workspace config; may be empty.
    pub presentation_name: String,
    /// Alias of the terminal carrying the task's output.
    pub terminal_id: String,
    pub state: TaskState,
}

impl TaskDescriptor {
    /// Name used in log prefixes and failure messages. Falls back to the id
    /// when the task has no presentation name.
    pub fn display_name(&self) -> &str {
        if self.presentation_name.is_empty() {
            &self.id
        } else {
            &self.presentation_name
        }
    }
}
