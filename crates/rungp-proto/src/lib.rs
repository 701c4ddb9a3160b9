//! # rungp-proto
//!
//! Shared types, error definitions, and traits for rungp.
//!
//! This crate provides the foundational abstractions used across all rungp crates,
//! including:
//! - Phases and their outcomes
//! - The UI event union carried by the event bus
//! - Task descriptors reported by the in-workspace supervisor
//! - Collaborator traits for the task status and terminal feeds

mod access;
mod error;
mod event;
mod phase;
mod source;
mod task;

pub use access::{WORKSPACE_FILE_SUFFIX, WorkspaceAccess, WorkspaceAccessInfo};
pub use error::{Error, Result};
pub use event::UiEvent;
pub use phase::{Outcome, Phase, PhaseOutcome};
pub use source::{
    TaskStatusSource, TaskStatusStream, TerminalChunk, TerminalSource, TerminalStream,
};
pub use task::{TaskDescriptor, TaskState};
