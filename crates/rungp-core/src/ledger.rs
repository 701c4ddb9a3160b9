//! Ordered record of boot phases.
//!
//! Every phase opened through a [`PhaseLedger`] is appended in open order and
//! stays in the ledger for the rest of the session. The returned
//! [`PhaseHandle`] is the only way to close the phase, and closing consumes
//! it, so an outcome can be set at most once.

use rungp_proto::{Phase, PhaseOutcome};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Callback run after a phase closes, outside the ledger lock.
pub(crate) type CloseHook = Arc<dyn Fn(&Phase) + Send + Sync>;

/// Shared, append-only phase ledger.
///
/// The image-log observer and the task supervisor each write their own
/// strictly sequential stream of phases; the ledger is the combined view.
#[derive(Debug, Clone, Default)]
pub struct PhaseLedger {
    entries: Arc<Mutex<Vec<Phase>>>,
}

impl PhaseLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pending phase and returns the handle that closes it.
    pub fn open(&self, label: &str, description: &str) -> PhaseHandle {
        let phase = Phase::open(label, description);
        let mut entries = self.lock();
        entries.push(phase);
        PhaseHandle {
            ledger: self.clone(),
            index: entries.len() - 1,
            label: label.to_string(),
            description: description.to_string(),
            started: Instant::now(),
            on_close: None,
        }
    }

    /// Returns a copy of all phases, open ones included, in open order.
    pub fn snapshot(&self) -> Vec<Phase> {
        self.lock().clone()
    }

    /// Returns the phases that are still pending.
    pub fn open_phases(&self) -> Vec<Phase> {
        self.lock().iter().filter(|p| p.is_open()).cloned().collect()
    }

    /// Returns the closed phases that failed.
    pub fn failures(&self) -> Vec<Phase> {
        self.lock()
            .iter()
            .filter(|p| p.outcome.failure().is_some())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn close(&self, index: usize, outcome: PhaseOutcome, started: Instant) -> Option<Phase> {
        let mut entries = self.lock();
        let phase = entries.get_mut(index)?;
        if phase.is_open() {
            phase.outcome = outcome;
            phase.duration = Some(started.elapsed());
        }
        Some(phase.clone())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Phase>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Closes exactly one phase in a ledger.
///
/// Dropping a handle without closing it leaves the phase pending.
pub struct PhaseHandle {
    ledger: PhaseLedger,
    index: usize,
    label: String,
    description: String,
    started: Instant,
    on_close: Option<CloseHook>,
}

impl PhaseHandle {
    pub(crate) fn with_close_hook(mut self, hook: CloseHook) -> Self {
        self.on_close = Some(hook);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Closes the phase successfully and returns the closed record.
    pub fn success(self) -> Phase {
        self.close(PhaseOutcome::Success)
    }

    /// Closes the phase as failed and returns the closed record.
    pub fn failure(self, reason: impl Into<String>) -> Phase {
        self.close(PhaseOutcome::Failure(reason.into()))
    }

    fn close(self, outcome: PhaseOutcome) -> Phase {
        let closed = self
            .ledger
            .close(self.index, outcome.clone(), self.started)
            .unwrap_or_else(|| {
                let mut phase = Phase::open(&self.label, &self.description);
                phase.outcome = outcome;
                phase.duration = Some(self.started.elapsed());
                phase
            });
        if let Some(hook) = &self.on_close {
            hook(&closed);
        }
        closed
    }
}

impl std::fmt::Debug for PhaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseHandle")
            .field("index", &self.index)
            .field("label", &self.label)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}
