//! Lifecycle observer: turns container output into boot phases.
//!
//! The container's combined stdout/stderr is unstructured text. The
//! observer splits it into lines and matches each line against an ordered
//! table of marker substrings ([`RULES`]); the first matching rule decides
//! what happens. Most rules are a phase transition: the open phase is closed
//! (successfully, unless the line carries a failure) and a new one is opened.
//!
//! Once the supervisor reports that task terminals have started, the
//! observer hands off to the [`TaskSupervisor`] for the rest of the session
//! and stops classifying. Container output keeps flowing to the raw log.
//!
//! The classifier is heuristic by nature. Unrecognized lines are ignored and
//! never produce an error.

use crate::ledger::PhaseHandle;
use crate::log::Log;
use crate::supervisor::{SupervisionReport, TaskSupervisor};
use crate::writer::{LineBuffer, LogWriter};
use rungp_proto::{TaskStatusSource, TerminalSource, WorkspaceAccess, WorkspaceAccessInfo};
use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Label of the phase open before any marker is seen.
pub const INITIAL_LABEL: &str = "starting";
/// Description of the phase open before any marker is seen. Only that phase
/// uses it; later phases start from an empty description.
pub const INITIAL_DESCRIPTION: &str = "workspace image";

/// What a marker line means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// The container runtime refused to start the workspace.
    DaemonError,
    /// The IDE is serving its web UI.
    WebUiAvailable,
    /// The IDE started installing its extension set.
    InstallingExtensions,
    /// The IDE process went away and is being restarted.
    IdeStopped,
    /// One extension install began.
    InstallingExtension,
    /// One extension finished downloading.
    DownloadedExtension,
    /// The supervisor started the task terminals.
    TasksStarted,
}

/// One entry of the classification table.
#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub needle: &'static str,
    pub marker: Marker,
}

/// Classification table. Evaluated top to bottom; the first match wins.
pub const RULES: &[Rule] = &[
    Rule { needle: "Error response from daemon:", marker: Marker::DaemonError },
    Rule { needle: "Web UI available", marker: Marker::WebUiAvailable },
    Rule { needle: "Installing extensions", marker: Marker::InstallingExtensions },
    Rule { needle: "IDE was stopped", marker: Marker::IdeStopped },
    Rule { needle: "Installing extension:", marker: Marker::InstallingExtension },
    Rule { needle: "Downloaded extension", marker: Marker::DownloadedExtension },
    Rule { needle: "task terminal has been started", marker: Marker::TasksStarted },
];

/// Finds the first rule matching `line`.
///
/// The tasks-started rule only applies when task observation is enabled.
pub fn match_rule(line: &str, observe_tasks: bool) -> Option<Marker> {
    RULES
        .iter()
        .filter(|rule| observe_tasks || rule.marker != Marker::TasksStarted)
        .find(|rule| line.contains(rule.needle))
        .map(|rule| rule.marker)
}

/// A phase transition produced by one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub label: String,
    pub description: String,
    /// Set when the phase being closed failed.
    pub failure: Option<String>,
    /// Set when the line announced the workspace URL.
    pub access: Option<WorkspaceAccess>,
}

/// Result of classifying one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Not a phase-relevant line.
    Ignore,
    Transition(Transition),
    /// Tasks started; supervision takes over from here.
    Handoff,
}

/// Line classifier state machine.
///
/// Pure and synchronous; [`observe`] drives it from a byte stream.
#[derive(Debug, Clone)]
pub struct Classifier {
    access: WorkspaceAccessInfo,
    observe_tasks: bool,
    label: String,
    steady: String,
    extensions: BTreeSet<String>,
    handed_off: bool,
}

impl Classifier {
    pub fn new(access: WorkspaceAccessInfo, observe_tasks: bool) -> Self {
        Self {
            access,
            observe_tasks,
            label: INITIAL_LABEL.to_string(),
            steady: String::new(),
            extensions: BTreeSet::new(),
            handed_off: false,
        }
    }

    /// Label of the current phase.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Description carried into the next transition. Empty until a marker
    /// sets one.
    pub fn description(&self) -> &str {
        &self.steady
    }

    /// Extensions announced as installing and not yet downloaded.
    pub fn pending_extensions(&self) -> impl Iterator<Item = &str> {
        self.extensions.iter().map(String::as_str)
    }

    pub fn handed_off(&self) -> bool {
        self.handed_off
    }

    /// Classifies one line and updates the state.
    pub fn classify(&mut self, line: &str) -> Step {
        if self.handed_off {
            return Step::Ignore;
        }
        let Some(marker) = match_rule(line, self.observe_tasks) else {
            return Step::Ignore;
        };

        let mut failure = None;
        let mut access = None;
        match marker {
            Marker::DaemonError => failure = Some(line.to_string()),
            Marker::WebUiAvailable => {
                let url = self.access.workspace_url();
                self.label = "running".to_string();
                self.steady = format!("workspace at {url}");
                access = Some(WorkspaceAccess {
                    url,
                    ssh_port: self.access.ssh_port,
                });
            }
            Marker::InstallingExtensions => {
                self.label = "installing extensions".to_string();
                self.steady = format!("running {}", self.steady);
            }
            Marker::IdeStopped => {
                self.label = "restarting".to_string();
                self.steady = "the workspace".to_string();
                failure = Some("IDE was stopped".to_string());
            }
            Marker::InstallingExtension => {
                if let Some(name) = extension_name(line, "Installing extension:") {
                    self.extensions.insert(name);
                }
                return Step::Ignore;
            }
            Marker::DownloadedExtension => {
                let before = self.extensions.len();
                self.extensions.retain(|name| !line.contains(name.as_str()));
                if self.extensions.len() == before || !self.extensions.is_empty() {
                    return Step::Ignore;
                }
                self.label = "ready".to_string();
            }
            Marker::TasksStarted => {
                self.handed_off = true;
                self.label = "running".to_string();
                self.steady = "tasks".to_string();
                return Step::Handoff;
            }
        }

        Step::Transition(Transition {
            label: self.label.clone(),
            description: self.steady.clone(),
            failure,
            access,
        })
    }
}

fn extension_name(line: &str, marker: &str) -> Option<String> {
    let (_, rest) = line.split_once(marker)?;
    let name = rest.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// The supervisor feeds used after handoff.
#[derive(Clone)]
pub struct TaskFeeds {
    pub status: Arc<dyn TaskStatusSource>,
    pub terminals: Arc<dyn TerminalSource>,
}

impl std::fmt::Debug for TaskFeeds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskFeeds").finish_non_exhaustive()
    }
}

/// Options for [`observe`].
#[derive(Clone, Default)]
pub struct ObserveOptions {
    /// Feeds to supervise tasks with. `None` disables task observation.
    pub tasks: Option<TaskFeeds>,
    /// Called with the reason whenever a phase closes as failed.
    pub on_fail: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    /// Called once task supervision has finished.
    pub on_tasks_done: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// Write side of an observation: raw container output goes in here.
///
/// Every chunk is passed to the classifier and to the raw log writer.
/// Writing never blocks and never fails, even after the classifier has
/// handed off or stopped.
pub struct ObserverSink {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    raw: LogWriter,
}

impl ObserverSink {
    /// Signals end of input to the classifier and flushes the raw log.
    pub fn close(&mut self) {
        self.tx = None;
        self.raw.finish();
    }
}

impl io::Write for ObserverSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(tx) = &self.tx
            && tx.send(buf.to_vec()).is_err()
        {
            self.tx = None;
        }
        self.raw.push(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// What an observation ended with.
#[derive(Debug, Default)]
pub struct ObservationReport {
    /// Phase still open when the input ended, for the caller to close.
    pub open_phase: Option<PhaseHandle>,
    /// Failure reasons of phases the observer closed.
    pub failures: Vec<String>,
    /// Result of task supervision, if the observer handed off.
    pub tasks: Option<SupervisionReport>,
}

/// A running observation.
pub struct Observation {
    pub sink: ObserverSink,
    pub handle: JoinHandle<ObservationReport>,
}

/// Starts observing container output.
///
/// Opens the initial `starting` phase right away and returns the sink to
/// write raw output into. The classifier runs on its own task until the
/// sink is closed, it hands off to task supervision, or `cancel` fires.
pub fn observe(
    log: Arc<dyn Log>,
    access: WorkspaceAccessInfo,
    opts: ObserveOptions,
    cancel: CancellationToken,
) -> Observation {
    let (tx, rx) = mpsc::unbounded_channel();
    let phase = log.start_phase(INITIAL_LABEL, INITIAL_DESCRIPTION);
    let sink = ObserverSink {
        tx: Some(tx),
        raw: log.writer(),
    };
    let classifier = Classifier::new(access, opts.tasks.is_some());
    let handle = tokio::spawn(run_observer(log, classifier, phase, opts, rx, cancel));
    Observation { sink, handle }
}

async fn run_observer(
    log: Arc<dyn Log>,
    mut classifier: Classifier,
    phase: PhaseHandle,
    opts: ObserveOptions,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    cancel: CancellationToken,
) -> ObservationReport {
    let mut report = ObservationReport::default();
    let mut phase = Some(phase);
    let mut lines = LineBuffer::new();

    loop {
        let chunk = tokio::select! {
            biased;
            chunk = rx.recv() => chunk,
            () = cancel.cancelled() => {
                debug!("Observer cancelled");
                break;
            }
        };

        let (batch, ended) = match chunk {
            Some(bytes) => (lines.push(&bytes), false),
            None => (lines.finish().into_iter().collect(), true),
        };
        for line in batch {
            match classifier.classify(&line) {
                Step::Ignore => {}
                Step::Transition(transition) => {
                    apply_transition(&*log, &opts, &mut phase, &mut report, transition);
                }
                Step::Handoff => {
                    if let Some(open) = phase.take() {
                        open.success();
                    }
                    drop(rx);
                    return hand_off(log, &opts, report, cancel).await;
                }
            }
        }
        if ended {
            break;
        }
    }

    report.open_phase = phase;
    report
}

fn apply_transition(
    log: &dyn Log,
    opts: &ObserveOptions,
    phase: &mut Option<PhaseHandle>,
    report: &mut ObservationReport,
    transition: Transition,
) {
    if let Some(access) = transition.access {
        log.set_workspace_access(access);
    }
    if let Some(open) = phase.take() {
        match transition.failure {
            Some(reason) => {
                if let Some(on_fail) = &opts.on_fail {
                    on_fail(&reason);
                }
                open.failure(reason.clone());
                report.failures.push(reason);
            }
            None => {
                open.success();
            }
        }
    }
    debug!(phase = %transition.label, description = %transition.description, "Phase transition");
    *phase = Some(log.start_phase(&transition.label, &transition.description));
}

async fn hand_off(
    log: Arc<dyn Log>,
    opts: &ObserveOptions,
    mut report: ObservationReport,
    cancel: CancellationToken,
) -> ObservationReport {
    let Some(feeds) = opts.tasks.clone() else {
        return report;
    };
    debug!("Tasks started; handing off to task supervision");
    let supervisor = TaskSupervisor::new(log, feeds.status, feeds.terminals);
    let tasks = supervisor.supervise(cancel).await;
    if let Some(reason) = tasks.outcome.failure()
        && let Some(on_fail) = &opts.on_fail
    {
        on_fail(reason);
    }
    debug!("All tasks are done");
    if let Some(on_tasks_done) = &opts.on_tasks_done {
        on_tasks_done();
    }
    report.tasks = Some(tasks);
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access(folder: &str) -> WorkspaceAccessInfo {
        WorkspaceAccessInfo {
            workspace_folder: folder.to_string(),
            http_port: 8080,
            ssh_port: 8082,
            supervisor_port: 0,
        }
    }

    fn labels(steps: &[Step]) -> Vec<String> {
        steps
            .iter()
            .filter_map(|step| match step {
                Step::Transition(t) => Some(t.label.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_rule_order_wins() {
        assert_eq!(
            match_rule("Error response from daemon: Web UI available", true),
            Some(Marker::DaemonError)
        );
        assert_eq!(
            match_rule("Installing extensions...", true),
            Some(Marker::InstallingExtensions)
        );
        assert_eq!(
            match_rule("Installing extension: foo", true),
            Some(Marker::InstallingExtension)
        );
        assert_eq!(match_rule("random output", true), None);
    }

    #[test]
    fn test_tasks_marker_requires_observation() {
        let line = "supervisor: task terminal has been started";
        assert_eq!(match_rule(line, true), Some(Marker::TasksStarted));
        assert_eq!(match_rule(line, false), None);
    }

    #[test]
    fn test_web_ui_sets_url_and_access() {
        let mut classifier = Classifier::new(access("/workspace/demo"), false);
        let step = classifier.classify("Web UI available at http://localhost:22999/");

        let Step::Transition(transition) = step else {
            panic!("expected a transition");
        };
        assert_eq!(transition.label, "running");
        assert_eq!(
            transition.description,
            "workspace at http://localhost:8080/?folder=/workspace/demo"
        );
        assert_eq!(
            transition.access,
            Some(WorkspaceAccess {
                url: "http://localhost:8080/?folder=/workspace/demo".into(),
                ssh_port: 8082,
            })
        );
    }

    #[test]
    fn test_web_ui_uses_workspace_param_for_workspace_files() {
        let mut classifier = Classifier::new(access("/workspace/demo/all.code-workspace"), false);
        classifier.classify("Web UI available");
        assert!(classifier.description().contains("?workspace=/workspace/demo/all.code-workspace"));
    }

    #[test]
    fn test_installing_extensions_extends_description() {
        let mut classifier = Classifier::new(access("/workspace/demo"), false);
        classifier.classify("Web UI available");
        classifier.classify("Installing extensions");
        assert_eq!(classifier.label(), "installing extensions");
        assert_eq!(
            classifier.description(),
            "running workspace at http://localhost:8080/?folder=/workspace/demo"
        );
    }

    #[test]
    fn test_installing_extensions_before_web_ui() {
        let mut classifier = Classifier::new(access("/workspace/demo"), false);
        let Step::Transition(transition) = classifier.classify("Installing extensions") else {
            panic!("expected a transition");
        };
        assert_eq!(transition.label, "installing extensions");
        assert_eq!(transition.description, "running ");
    }

    #[test]
    fn test_ready_only_after_last_download() {
        let mut classifier = Classifier::new(access("/workspace/demo"), false);
        let steps: Vec<Step> = [
            "Installing extension: foo",
            "Installing extension: bar",
            "Installing extension: foo",
            "Downloaded extension foo",
            "Downloaded extension bar",
        ]
        .iter()
        .map(|line| classifier.classify(line))
        .collect();

        assert_eq!(steps[3], Step::Ignore);
        assert_eq!(labels(&steps), vec!["ready"]);
        assert_eq!(classifier.pending_extensions().count(), 0);
    }

    #[test]
    fn test_download_of_unknown_extension_is_noop() {
        let mut classifier = Classifier::new(access("/workspace/demo"), false);
        assert_eq!(classifier.classify("Downloaded extension baz"), Step::Ignore);

        classifier.classify("Installing extension: foo");
        assert_eq!(classifier.classify("Downloaded extension baz"), Step::Ignore);
        assert_eq!(classifier.pending_extensions().collect::<Vec<_>>(), vec!["foo"]);
    }

    #[test]
    fn test_ide_stopped_fails_and_restarts() {
        let mut classifier = Classifier::new(access("/workspace/demo"), false);
        let Step::Transition(transition) = classifier.classify("IDE was stopped, restarting") else {
            panic!("expected a transition");
        };
        assert_eq!(transition.label, "restarting");
        assert_eq!(transition.description, "the workspace");
        assert_eq!(transition.failure.as_deref(), Some("IDE was stopped"));
    }

    #[test]
    fn test_daemon_error_keeps_label() {
        let mut classifier = Classifier::new(access("/workspace/demo"), false);
        let line = "docker: Error response from daemon: port is already allocated.";
        let Step::Transition(transition) = classifier.classify(line) else {
            panic!("expected a transition");
        };
        assert_eq!(transition.label, INITIAL_LABEL);
        assert_eq!(transition.failure.as_deref(), Some(line));
    }

    #[test]
    fn test_handoff_happens_once() {
        let mut classifier = Classifier::new(access("/workspace/demo"), true);
        assert_eq!(classifier.classify("task terminal has been started"), Step::Handoff);
        assert!(classifier.handed_off());
        assert_eq!(classifier.classify("task terminal has been started"), Step::Ignore);
        assert_eq!(classifier.classify("Web UI available"), Step::Ignore);
    }
}
