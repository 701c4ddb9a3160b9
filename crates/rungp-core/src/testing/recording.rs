use crate::bus::{Delivery, RenderSink};
use crate::ledger::{PhaseHandle, PhaseLedger};
use crate::log::Log;
use crate::writer::{LineSink, LogWriter};
use rungp_proto::{Phase, UiEvent, WorkspaceAccess};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Default)]
struct Recorded {
    lines: Vec<String>,
    warnings: Vec<String>,
    accesses: Vec<WorkspaceAccess>,
    discards: usize,
}

/// A [`Log`] that keeps everything it is given.
#[derive(Debug, Clone, Default)]
pub struct RecordingLog {
    ledger: PhaseLedger,
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.with(|r| r.lines.clone())
    }

    pub fn warnings(&self) -> Vec<String> {
        self.with(|r| r.warnings.clone())
    }

    pub fn accesses(&self) -> Vec<WorkspaceAccess> {
        self.with(|r| r.accesses.clone())
    }

    pub fn discards(&self) -> usize {
        self.with(|r| r.discards)
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.ledger.snapshot()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Recorded) -> T) -> T {
        f(&mut self.recorded.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl Log for RecordingLog {
    fn start_phase(&self, label: &str, description: &str) -> PhaseHandle {
        self.ledger.open(label, description)
    }

    fn writer(&self) -> LogWriter {
        let recorded = Arc::clone(&self.recorded);
        let sink: LineSink = Arc::new(move |line: &str| {
            recorded
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .lines
                .push(line.to_string());
        });
        LogWriter::new(sink)
    }

    fn discard_logs(&self) {
        self.with(|r| r.discards += 1);
    }

    fn warn(&self, message: &str) {
        self.with(|r| r.warnings.push(message.to_string()));
    }

    fn set_workspace_access(&self, access: WorkspaceAccess) {
        self.with(|r| r.accesses.push(access));
    }

    fn ledger(&self) -> &PhaseLedger {
        &self.ledger
    }
}

/// A [`RenderSink`] that records every delivered event.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<UiEvent>>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<UiEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RenderSink for RecordingSink {
    fn deliver(&mut self, event: UiEvent) -> Delivery {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Delivery::Continue
    }
}
