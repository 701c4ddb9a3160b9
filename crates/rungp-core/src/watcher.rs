//! Watches a single task terminal until its process exits.

use crate::writer::LogWriter;
use futures::StreamExt;
use rungp_proto::{TaskDescriptor, TerminalChunk, TerminalSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How a watched task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchVerdict {
    /// Exit code 0.
    Succeeded,
    /// Non-zero exit code or a broken feed.
    Failed(String),
    /// Stopped by its cancellation token. Not a failure.
    Cancelled,
}

impl WatchVerdict {
    pub fn failure(&self) -> Option<&str> {
        match self {
            WatchVerdict::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Streams one task's terminal output into a writer.
pub struct TaskWatcher {
    task: TaskDescriptor,
    terminals: Arc<dyn TerminalSource>,
    writer: LogWriter,
}

impl TaskWatcher {
    pub fn new(task: TaskDescriptor, terminals: Arc<dyn TerminalSource>, writer: LogWriter) -> Self {
        Self {
            task,
            terminals,
            writer,
        }
    }

    pub fn task(&self) -> &TaskDescriptor {
        &self.task
    }

    /// Runs until the task exits, its feed breaks, or `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> WatchVerdict {
        self.run_until_closed(cancel, CancellationToken::new(), Duration::ZERO)
            .await
    }

    /// Like [`run`](Self::run), but `closed` only starts a drain.
    ///
    /// A task can be reported closed before its exit code has been read from
    /// the terminal. Once `closed` fires the feed is read for up to `drain`
    /// longer. `abort` stops the watcher immediately.
    pub async fn run_until_closed(
        mut self,
        abort: CancellationToken,
        closed: CancellationToken,
        drain: Duration,
    ) -> WatchVerdict {
        let name = self.task.display_name().to_string();
        let mut stop = Stop {
            abort,
            closed,
            drain,
            deadline: None,
        };

        let terminals = Arc::clone(&self.terminals);
        let terminal_id = self.task.terminal_id.clone();
        let listen = terminals.listen(&terminal_id);
        tokio::pin!(listen);
        let listen = tokio::select! {
            biased;
            listen = &mut listen => listen,
            () = stop.wait() => return WatchVerdict::Cancelled,
        };
        let mut feed = match listen {
            Ok(feed) => feed,
            Err(e) => return WatchVerdict::Failed(format!("cannot listen to task {name}: {e}")),
        };

        let verdict = loop {
            let chunk = tokio::select! {
                biased;
                chunk = feed.next() => chunk,
                () = stop.wait() => break WatchVerdict::Cancelled,
            };
            match chunk {
                Some(Ok(TerminalChunk::Data(bytes))) => self.writer.push(&bytes),
                Some(Ok(TerminalChunk::ExitCode(0))) => break WatchVerdict::Succeeded,
                Some(Ok(TerminalChunk::ExitCode(code))) => {
                    break WatchVerdict::Failed(format!(
                        "task {name} failed with exit code {code}"
                    ));
                }
                Some(Err(e)) => break WatchVerdict::Failed(format!("task {name} failed: {e}")),
                None => {
                    break WatchVerdict::Failed(format!("task {name} ended without an exit code"));
                }
            }
        };

        self.writer.finish();
        debug!(task = %name, ?verdict, "Task watcher finished");
        verdict
    }
}

struct Stop {
    abort: CancellationToken,
    closed: CancellationToken,
    drain: Duration,
    deadline: Option<Instant>,
}

impl Stop {
    /// Resolves on abort, or once the drain after close has run out.
    ///
    /// Cancel safe: the drain deadline survives a dropped call.
    async fn wait(&mut self) {
        loop {
            match self.deadline {
                Some(deadline) => {
                    tokio::select! {
                        biased;
                        () = self.abort.cancelled() => return,
                        () = tokio::time::sleep_until(deadline) => return,
                    }
                }
                None => {
                    tokio::select! {
                        biased;
                        () = self.abort.cancelled() => return,
                        () = self.closed.cancelled() => {
                            self.deadline = Some(Instant::now() + self.drain);
                        }
                    }
                }
            }
        }
    }
}
