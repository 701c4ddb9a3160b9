//! Task supervision.
//!
//! After the workspace reports that its task terminals started, the
//! [`TaskSupervisor`] follows the supervisor's task status feed. Each task
//! moves `unseen -> running -> closed`:
//!
//! - first sight of a running task spawns a [`TaskWatcher`] on a child
//!   cancellation token,
//! - a closed task counts towards completion. Its watcher keeps reading for
//!   [`DEFAULT_CLOSE_DRAIN`] so an exit code still in flight is not lost.
//!
//! Supervision ends once every task of the most recent snapshot has closed.
//! Watchers of tasks that dropped out of the snapshot are closed too.
//! Its `running tasks` phase then closes successfully if no watcher
//! reported a failure, or as failed with the failures joined by `". "`.

use crate::ledger::PhaseHandle;
use crate::log::Log;
use crate::watcher::{TaskWatcher, WatchVerdict};
use futures::StreamExt;
use rungp_proto::{
    Outcome, Phase, TaskDescriptor, TaskState, TaskStatusSource, TerminalSource,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Separator between failure descriptions in a failed outcome.
pub const FAILURE_SEPARATOR: &str = ". ";

/// How long a watcher keeps reading after its task was reported closed.
pub const DEFAULT_CLOSE_DRAIN: Duration = Duration::from_secs(1);

/// Task failures collected from concurrently running watchers.
#[derive(Debug, Clone, Default)]
pub struct FailureAggregate {
    failures: Arc<Mutex<Vec<String>>>,
}

impl FailureAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, failure: impl Into<String>) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(failure.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_empty(&self) -> bool {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Success if nothing failed, else a failure listing every description.
    pub fn outcome(&self) -> Outcome {
        let failures = self.snapshot();
        if failures.is_empty() {
            Outcome::Success
        } else {
            Outcome::Failure(failures.join(FAILURE_SEPARATOR))
        }
    }
}

/// Result of one supervised run.
#[derive(Debug, Clone)]
pub struct SupervisionReport {
    pub outcome: Outcome,
    /// The closed `running tasks` phase.
    pub phase: Phase,
    /// Task failures reported by watchers.
    pub failures: Vec<String>,
    /// Number of watchers spawned.
    pub spawned: usize,
    /// Number of watchers closed because their task closed.
    pub cancelled: usize,
}

struct WatcherSlot {
    closed: CancellationToken,
    handle: JoinHandle<WatchVerdict>,
}

/// Follows the task status feed and owns one watcher per running task.
pub struct TaskSupervisor {
    log: Arc<dyn Log>,
    status: Arc<dyn TaskStatusSource>,
    terminals: Arc<dyn TerminalSource>,
    failures: FailureAggregate,
    close_drain: Duration,
}

impl TaskSupervisor {
    pub fn new(
        log: Arc<dyn Log>,
        status: Arc<dyn TaskStatusSource>,
        terminals: Arc<dyn TerminalSource>,
    ) -> Self {
        Self {
            log,
            status,
            terminals,
            failures: FailureAggregate::new(),
            close_drain: DEFAULT_CLOSE_DRAIN,
        }
    }

    #[must_use]
    pub fn with_close_drain(mut self, drain: Duration) -> Self {
        self.close_drain = drain;
        self
    }

    /// The aggregate watchers record their failures into.
    pub fn failures(&self) -> &FailureAggregate {
        &self.failures
    }

    /// Supervises tasks until they have all closed, the status feed breaks,
    /// or `cancel` fires.
    ///
    /// Always returns a report; failures are reported in its outcome.
    pub async fn supervise(self, cancel: CancellationToken) -> SupervisionReport {
        let phase = self.log.start_phase("running", "tasks");
        let scope = cancel.child_token();
        let mut run = Run {
            supervisor: &self,
            scope: scope.clone(),
            active: HashMap::new(),
            retired: Vec::new(),
            closed: HashSet::new(),
            spawned: 0,
            cancelled: 0,
        };

        let end = run.follow_feed(&cancel).await;
        let (spawned, cancelled) = (run.spawned, run.cancelled);
        match end {
            FeedEnd::AllClosed => {
                run.close_remaining();
                run.join_all().await;
                let outcome = self.failures.outcome();
                self.finish(phase, outcome, spawned, cancelled)
            }
            FeedEnd::Cancelled => {
                scope.cancel();
                run.join_all().await;
                let outcome = Outcome::Failure("task supervision was cancelled".to_string());
                self.finish(phase, outcome, spawned, cancelled)
            }
            FeedEnd::Broken(reason) => {
                // Stop waiting on the watchers; their verdicts no longer count.
                scope.cancel();
                let outcome = Outcome::Failure(format!("cannot connect to tasks: {reason}"));
                self.finish(phase, outcome, spawned, cancelled)
            }
        }
    }

    fn finish(
        &self,
        phase: PhaseHandle,
        outcome: Outcome,
        spawned: usize,
        cancelled: usize,
    ) -> SupervisionReport {
        let phase = match &outcome {
            Outcome::Success => phase.success(),
            Outcome::Failure(reason) => {
                warn!(%reason, "Task supervision failed");
                phase.failure(reason.clone())
            }
        };
        SupervisionReport {
            outcome,
            phase,
            failures: self.failures.snapshot(),
            spawned,
            cancelled,
        }
    }
}

enum FeedEnd {
    AllClosed,
    Cancelled,
    Broken(String),
}

/// Mutable state of one supervised run. Touched only by the feed loop.
struct Run<'a> {
    supervisor: &'a TaskSupervisor,
    scope: CancellationToken,
    active: HashMap<String, WatcherSlot>,
    retired: Vec<JoinHandle<WatchVerdict>>,
    closed: HashSet<String>,
    spawned: usize,
    cancelled: usize,
}

impl Run<'_> {
    async fn follow_feed(&mut self, cancel: &CancellationToken) -> FeedEnd {
        let mut feed = tokio::select! {
            biased;
            () = cancel.cancelled() => return FeedEnd::Cancelled,
            feed = self.supervisor.status.observe() => match feed {
                Ok(feed) => feed,
                Err(e) => return FeedEnd::Broken(e.to_string()),
            },
        };

        loop {
            let update = tokio::select! {
                biased;
                () = cancel.cancelled() => return FeedEnd::Cancelled,
                update = feed.next() => update,
            };
            let tasks = match update {
                Some(Ok(tasks)) => tasks,
                Some(Err(e)) => return FeedEnd::Broken(e.to_string()),
                None => return FeedEnd::Broken("status feed ended".to_string()),
            };
            if tasks.is_empty() {
                info!("No tasks to supervise");
                return FeedEnd::AllClosed;
            }
            for task in &tasks {
                self.apply(task);
            }
            if self.closed.len() >= tasks.len() {
                debug!(closed = self.closed.len(), "All tasks closed");
                return FeedEnd::AllClosed;
            }
        }
    }

    fn apply(&mut self, task: &TaskDescriptor) {
        match task.state {
            TaskState::Opening => {}
            TaskState::Running => {
                if self.active.contains_key(&task.id) || self.closed.contains(&task.id) {
                    return;
                }
                self.spawn(task);
            }
            TaskState::Closed => {
                if !self.closed.insert(task.id.clone()) {
                    return;
                }
                if let Some(slot) = self.active.remove(&task.id) {
                    slot.closed.cancel();
                    self.retired.push(slot.handle);
                    self.cancelled += 1;
                }
                debug!(task = %task.id, "Task closed");
            }
        }
    }

    fn spawn(&mut self, task: &TaskDescriptor) {
        let writer = match task.presentation_name.as_str() {
            "" => self.supervisor.log.writer(),
            name => self.supervisor.log.writer().prefixed(format!("[{name}] ")),
        };
        let watcher = TaskWatcher::new(
            task.clone(),
            Arc::clone(&self.supervisor.terminals),
            writer,
        );
        let closed = CancellationToken::new();
        let scope = self.scope.clone();
        let drain = self.supervisor.close_drain;
        let failures = self.supervisor.failures.clone();
        let handle = tokio::spawn({
            let closed = closed.clone();
            async move {
                let verdict = watcher
                    .run_until_closed(scope.clone(), closed, drain)
                    .await;
                if let Some(reason) = verdict.failure()
                    && !scope.is_cancelled()
                {
                    failures.record(reason);
                }
                verdict
            }
        });
        debug!(task = %task.id, terminal = %task.terminal_id, "Watching task");
        self.active.insert(task.id.clone(), WatcherSlot { closed, handle });
        self.spawned += 1;
    }

    /// Closes watchers whose task left the snapshot without closing.
    fn close_remaining(&mut self) {
        for (id, slot) in self.active.drain() {
            debug!(task = %id, "Task no longer reported");
            slot.closed.cancel();
            self.retired.push(slot.handle);
        }
    }

    async fn join_all(&mut self) {
        let handles = self
            .retired
            .drain(..)
            .chain(self.active.drain().map(|(_, slot)| slot.handle));
        for handle in handles.collect::<Vec<_>>() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Task watcher panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_outcome_joins_failures() {
        let aggregate = FailureAggregate::new();
        assert_eq!(aggregate.outcome(), Outcome::Success);

        aggregate.record("task build failed with exit code 1");
        aggregate.record("task lint failed with exit code 2");

        assert_eq!(
            aggregate.outcome(),
            Outcome::Failure(
                "task build failed with exit code 1. task lint failed with exit code 2".into()
            )
        );
    }

    #[test]
    fn test_aggregate_clones_share_failures() {
        let aggregate = FailureAggregate::new();
        aggregate.clone().record("task a failed");
        assert!(!aggregate.is_empty());
    }
}
