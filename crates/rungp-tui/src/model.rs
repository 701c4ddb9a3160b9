//! What the renderer shows, rebuilt from UI events.

use rungp_core::{Delivery, RenderSink};
use rungp_proto::{Phase, UiEvent, WorkspaceAccess};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Number of log lines kept for display. Older lines are dropped.
pub const LOG_TAIL: usize = 10;

/// Display state.
#[derive(Debug, Clone, Default)]
pub struct UiModel {
    /// Completed phases in completion order.
    pub phases: Vec<Phase>,
    /// Title of the phase in progress.
    pub current: Option<String>,
    pub logs: VecDeque<String>,
    pub warnings: Vec<String>,
    pub access: Option<WorkspaceAccess>,
    /// Set once `Quit` has been received.
    pub quit: bool,
}

impl UiModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: UiEvent) {
        match event {
            UiEvent::PhaseStart(title) => self.current = Some(title),
            UiEvent::PhaseDone(phase) => {
                if self.current.as_deref() == Some(phase.title().as_str()) {
                    self.current = None;
                }
                self.phases.push(phase);
            }
            UiEvent::LogLine(line) => {
                let stripped = strip_ansi_escapes::strip_str(&line);
                self.logs.push_back(stripped);
                while self.logs.len() > LOG_TAIL {
                    self.logs.pop_front();
                }
            }
            UiEvent::DiscardLogs => self.logs.clear(),
            UiEvent::Warning(warning) => self.warnings.push(warning),
            UiEvent::SetWorkspaceAccess(access) => self.access = Some(access),
            UiEvent::Quit => self.quit = true,
        }
    }

    /// True if any completed phase failed.
    pub fn has_failures(&self) -> bool {
        self.phases.iter().any(|p| p.outcome.failure().is_some())
    }
}

/// A model shared between the event forwarder and the draw loop.
#[derive(Debug, Clone, Default)]
pub struct SharedModel(Arc<Mutex<UiModel>>);

impl SharedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, UiModel> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the current state.
    pub fn snapshot(&self) -> UiModel {
        self.lock().clone()
    }
}

impl RenderSink for SharedModel {
    fn deliver(&mut self, event: UiEvent) -> Delivery {
        self.lock().apply(event);
        Delivery::Continue
    }
}
