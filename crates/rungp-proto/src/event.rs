//! Messages carried from producers to the renderer.

use crate::access::WorkspaceAccess;
use crate::phase::Phase;

/// A UI event. Produced by any component, consumed only by the event bus
/// forwarder. Events are plain values; nothing is shared after enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    /// A phase opened; carries its title.
    PhaseStart(String),
    /// A phase closed; carries the closed record including its outcome.
    PhaseDone(Phase),
    /// One line of raw or task output.
    LogLine(String),
    /// The log tail is no longer relevant and should be cleared.
    DiscardLogs,
    Warning(String),
    SetWorkspaceAccess(WorkspaceAccess),
    /// The renderer should stop.
    Quit,
}

impl UiEvent {
    /// Short name used in structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            UiEvent::PhaseStart(_) => "phase_start",
            UiEvent::PhaseDone(_) => "phase_done",
            UiEvent::LogLine(_) => "log_line",
            UiEvent::DiscardLogs => "discard_logs",
            UiEvent::Warning(_) => "warning",
            UiEvent::SetWorkspaceAccess(_) => "set_workspace_access",
            UiEvent::Quit => "quit",
        }
    }
}
