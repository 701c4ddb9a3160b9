//! The `Log` capability: where phases, output lines and warnings go.
//!
//! Components never talk to a renderer directly. They start phases, write
//! output and raise warnings through [`Log`], and the variant chosen at
//! startup decides what that means:
//!
//! - [`SilentLog`] records phases in the ledger and drops everything else.
//! - [`ConsoleLog`] prints `[label] description` style lines to a writer.
//! - [`BusLog`] turns every call into a [`UiEvent`] on the [`EventBus`].
//!
//! All variants append to a [`PhaseLedger`], which is the source of truth
//! for phase outcomes regardless of what the display received.

use crate::bus::EventBus;
use crate::ledger::{PhaseHandle, PhaseLedger};
use crate::writer::{LineSink, LogWriter};
use rungp_proto::{UiEvent, WorkspaceAccess};
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Sink for everything the workspace boot reports.
pub trait Log: Send + Sync {
    /// Opens a phase. The handle closes it.
    fn start_phase(&self, label: &str, description: &str) -> PhaseHandle;

    /// Returns a writer for raw output lines.
    fn writer(&self) -> LogWriter;

    /// Signals that the output shown so far is no longer relevant.
    fn discard_logs(&self) {}

    fn warn(&self, message: &str) {
        warn!("{message}");
    }

    fn debug(&self, message: &str) {
        debug!("{message}");
    }

    /// Announces where the running workspace can be reached.
    fn set_workspace_access(&self, access: WorkspaceAccess) {
        info!(url = %access.url, ssh_port = access.ssh_port, "Workspace available");
    }

    /// The ledger this log records phases into.
    fn ledger(&self) -> &PhaseLedger;
}

/// Records phases, drops output.
#[derive(Debug, Clone, Default)]
pub struct SilentLog {
    ledger: PhaseLedger,
}

impl SilentLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ledger(ledger: PhaseLedger) -> Self {
        Self { ledger }
    }
}

impl Log for SilentLog {
    fn start_phase(&self, label: &str, description: &str) -> PhaseHandle {
        self.ledger.open(label, description)
    }

    fn writer(&self) -> LogWriter {
        LogWriter::discard()
    }

    fn ledger(&self) -> &PhaseLedger {
        &self.ledger
    }
}

type SharedOut = Arc<Mutex<Box<dyn Write + Send>>>;

/// Plain line-oriented console output.
///
/// Phases print as `[label] description` when opened and `[label] DONE` or
/// `[label] FAILED! reason` when closed.
#[derive(Clone)]
pub struct ConsoleLog {
    ledger: PhaseLedger,
    out: SharedOut,
}

impl ConsoleLog {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            ledger: PhaseLedger::new(),
            out: Arc::new(Mutex::new(Box::new(out))),
        }
    }

    /// Console output on stdout.
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    fn print(out: &SharedOut, line: &str) {
        let mut out = out.lock().unwrap_or_else(PoisonError::into_inner);
        // Console output is best effort; a closed stdout must not stop the boot.
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

impl Log for ConsoleLog {
    fn start_phase(&self, label: &str, description: &str) -> PhaseHandle {
        Self::print(&self.out, &format!("[{label}] {description}"));
        let out = Arc::clone(&self.out);
        self.ledger
            .open(label, description)
            .with_close_hook(Arc::new(move |phase| match phase.outcome.failure() {
                Some(reason) => Self::print(&out, &format!("[{}] FAILED! {reason}", phase.label)),
                None => Self::print(&out, &format!("[{}] DONE", phase.label)),
            }))
    }

    fn writer(&self) -> LogWriter {
        let out = Arc::clone(&self.out);
        let sink: LineSink = Arc::new(move |line: &str| Self::print(&out, line));
        LogWriter::new(sink)
    }

    fn warn(&self, message: &str) {
        Self::print(&self.out, &format!("[WARN] {message}"));
    }

    fn set_workspace_access(&self, access: WorkspaceAccess) {
        Self::print(&self.out, &format!("workspace available at {}", access.url));
        if access.ssh_port > 0 {
            Self::print(
                &self.out,
                &format!("ssh available via: ssh -p {} gitpod@localhost", access.ssh_port),
            );
        }
    }

    fn ledger(&self) -> &PhaseLedger {
        &self.ledger
    }
}

impl std::fmt::Debug for ConsoleLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleLog")
            .field("ledger", &self.ledger)
            .finish_non_exhaustive()
    }
}

/// Publishes everything as [`UiEvent`]s on the event bus.
#[derive(Debug, Clone)]
pub struct BusLog {
    ledger: PhaseLedger,
    bus: EventBus,
}

impl BusLog {
    pub fn new(bus: EventBus) -> Self {
        Self {
            ledger: PhaseLedger::new(),
            bus,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}

impl Log for BusLog {
    fn start_phase(&self, label: &str, description: &str) -> PhaseHandle {
        let handle = self.ledger.open(label, description);
        self.bus.send(UiEvent::PhaseStart(format!("{label} {description}")));
        let bus = self.bus.clone();
        handle.with_close_hook(Arc::new(move |phase| {
            if !bus.send(UiEvent::PhaseDone(phase.clone())) {
                debug!(phase = %phase.label, "Phase completion not delivered to renderer");
            }
        }))
    }

    fn writer(&self) -> LogWriter {
        let bus = self.bus.clone();
        let sink: LineSink = Arc::new(move |line: &str| {
            bus.send(UiEvent::LogLine(line.to_string()));
        });
        LogWriter::new(sink)
    }

    fn discard_logs(&self) {
        self.bus.send(UiEvent::DiscardLogs);
    }

    fn warn(&self, message: &str) {
        warn!("{message}");
        self.bus.send(UiEvent::Warning(message.to_string()));
    }

    fn set_workspace_access(&self, access: WorkspaceAccess) {
        info!(url = %access.url, ssh_port = access.ssh_port, "Workspace available");
        self.bus.send(UiEvent::SetWorkspaceAccess(access));
    }

    fn ledger(&self) -> &PhaseLedger {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rungp_proto::PhaseOutcome;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_console_log_prints_phase_lifecycle() {
        let buf = SharedBuf::default();
        let log = ConsoleLog::new(buf.clone());

        log.start_phase("building", "workspace image").success();
        log.start_phase("running", "tasks").failure("task build failed");
        log.warn("cannot read public SSH key");

        assert_eq!(
            buf.text(),
            "[building] workspace image\n[building] DONE\n\
             [running] tasks\n[running] FAILED! task build failed\n\
             [WARN] cannot read public SSH key\n"
        );
        assert_eq!(log.ledger().len(), 2);
    }

    #[test]
    fn test_console_writer_prints_lines() {
        let buf = SharedBuf::default();
        let log = ConsoleLog::new(buf.clone());
        let mut writer = log.writer();
        writer.push(b"Step 1/4\nStep 2/4\n");

        assert_eq!(buf.text(), "Step 1/4\nStep 2/4\n");
    }

    #[test]
    fn test_bus_log_emits_phase_events() {
        let (bus, mut rx) = EventBus::new(16);
        let log = BusLog::new(bus);

        let closed = log.start_phase("starting", "workspace image").failure("boom");

        assert_eq!(
            rx.try_recv(),
            Some(UiEvent::PhaseStart("starting workspace image".into()))
        );
        match rx.try_recv() {
            Some(UiEvent::PhaseDone(phase)) => {
                assert_eq!(phase, closed);
                assert_eq!(phase.outcome, PhaseOutcome::Failure("boom".into()));
            }
            other => panic!("expected PhaseDone, got {other:?}"),
        }
    }

    #[test]
    fn test_bus_log_writer_and_warnings() {
        let (bus, mut rx) = EventBus::new(16);
        let log = BusLog::new(bus);

        log.writer().push(b"hello\n");
        log.warn("careful");
        log.discard_logs();
        log.set_workspace_access(WorkspaceAccess {
            url: "http://localhost:8080/?folder=/workspace".into(),
            ssh_port: 8082,
        });

        assert_eq!(rx.try_recv(), Some(UiEvent::LogLine("hello".into())));
        assert_eq!(rx.try_recv(), Some(UiEvent::Warning("careful".into())));
        assert_eq!(rx.try_recv(), Some(UiEvent::DiscardLogs));
        assert!(matches!(rx.try_recv(), Some(UiEvent::SetWorkspaceAccess(_))));
    }

    #[test]
    fn test_bus_log_ledger_survives_dropped_events() {
        let (bus, _rx) = EventBus::new(1);
        let log = BusLog::new(bus);

        log.start_phase("starting", "workspace image").failure("daemon error");

        let phases = log.ledger().snapshot();
        assert_eq!(phases[0].outcome.failure(), Some("daemon error"));
        assert!(log.bus().dropped() >= 1);
    }
}
