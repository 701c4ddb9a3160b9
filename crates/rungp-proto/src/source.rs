//! Collaborator traits for the in-workspace supervisor.
//!
//! The supervisor exposes two feeds: a status feed yielding repeated
//! snapshots of all tasks, and one output feed per task terminal yielding
//! bytes followed by a single exit code. How they are transported is up to
//! the implementor; the core only sees these streams.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::task::TaskDescriptor;

/// Stream of task status snapshots. Ends when the feed closes.
pub type TaskStatusStream = BoxStream<'static, Result<Vec<TaskDescriptor>>>;

/// Stream of output from one task terminal.
pub type TerminalStream = BoxStream<'static, Result<TerminalChunk>>;

/// One message on a task terminal feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalChunk {
    /// Raw output bytes.
    Data(Vec<u8>),
    /// The task's process exited.
    ExitCode(i32),
}

/// Opens the task status feed.
#[async_trait]
pub trait TaskStatusSource: Send + Sync {
    async fn observe(&self) -> Result<TaskStatusStream>;
}

/// Opens the output feed of a task terminal.
#[async_trait]
pub trait TerminalSource: Send + Sync {
    async fn listen(&self, terminal_id: &str) -> Result<TerminalStream>;
}
