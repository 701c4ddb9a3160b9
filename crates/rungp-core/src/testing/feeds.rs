use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use rungp_proto::{
    Error, Result, TaskDescriptor, TaskState, TaskStatusSource, TaskStatusStream, TerminalChunk,
    TerminalSource, TerminalStream,
};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

type StatusItem = Result<Vec<TaskDescriptor>>;

/// Builds a task in the given state. The terminal id is `term-{name}`.
pub fn task(name: &str, state: TaskState) -> TaskDescriptor {
    TaskDescriptor {
        id: name.to_string(),
        presentation_name: name.to_string(),
        terminal_id: format!("term-{name}"),
        state,
    }
}

pub fn opening(name: &str) -> TaskDescriptor {
    task(name, TaskState::Opening)
}

pub fn running(name: &str) -> TaskDescriptor {
    task(name, TaskState::Running)
}

pub fn closed(name: &str) -> TaskDescriptor {
    task(name, TaskState::Closed)
}

/// A status feed whose snapshots are pushed through a [`FeedController`].
///
/// The feed can be observed once.
pub struct ScriptedTaskFeed {
    rx: Mutex<Option<mpsc::UnboundedReceiver<StatusItem>>>,
    connect_error: Option<String>,
}

/// Pushes snapshots into a [`ScriptedTaskFeed`]. Dropping it ends the feed.
#[derive(Clone)]
pub struct FeedController {
    tx: mpsc::UnboundedSender<StatusItem>,
}

impl ScriptedTaskFeed {
    pub fn new() -> (Self, FeedController) {
        let (tx, rx) = mpsc::unbounded_channel();
        let feed = Self {
            rx: Mutex::new(Some(rx)),
            connect_error: None,
        };
        (feed, FeedController { tx })
    }

    /// A feed that replays `updates` and then ends.
    pub fn from_updates(updates: Vec<Vec<TaskDescriptor>>) -> Self {
        let (feed, controller) = Self::new();
        for update in updates {
            controller.update(update);
        }
        feed
    }

    /// A feed that cannot be connected to.
    pub fn failing(message: &str) -> Self {
        Self {
            rx: Mutex::new(None),
            connect_error: Some(message.to_string()),
        }
    }
}

impl FeedController {
    pub fn update(&self, tasks: Vec<TaskDescriptor>) {
        let _ = self.tx.send(Ok(tasks));
    }

    pub fn fail(&self, message: &str) {
        let _ = self.tx.send(Err(Error::Feed(message.to_string())));
    }
}

#[async_trait]
impl TaskStatusSource for ScriptedTaskFeed {
    async fn observe(&self) -> Result<TaskStatusStream> {
        if let Some(message) = &self.connect_error {
            return Err(Error::Connect(message.clone()));
        }
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::Connect("status feed already observed".to_string()))?;
        let updates = stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        });
        Ok(updates.boxed())
    }
}

struct Script {
    chunks: Vec<std::result::Result<TerminalChunk, String>>,
    hold_open: bool,
    delay: Duration,
}

/// Canned terminal output keyed by terminal id.
///
/// Listening to a terminal without a script fails.
#[derive(Default)]
pub struct ScriptedTerminals {
    scripts: Mutex<HashMap<String, Script>>,
    listens: Mutex<HashMap<String, usize>>,
}

impl ScriptedTerminals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays `chunks`, then ends the feed.
    pub fn script(&self, terminal_id: &str, chunks: Vec<std::result::Result<TerminalChunk, String>>) {
        self.insert(terminal_id, chunks, false, Duration::ZERO);
    }

    /// Replays `chunks`, then keeps the feed open until the listener goes away.
    pub fn script_open(
        &self,
        terminal_id: &str,
        chunks: Vec<std::result::Result<TerminalChunk, String>>,
    ) {
        self.insert(terminal_id, chunks, true, Duration::ZERO);
    }

    /// Output followed by the given exit code.
    pub fn exits_with(&self, terminal_id: &str, output: &str, code: i32) {
        self.script(
            terminal_id,
            vec![
                Ok(TerminalChunk::Data(output.as_bytes().to_vec())),
                Ok(TerminalChunk::ExitCode(code)),
            ],
        );
    }

    /// Nothing for `delay`, then the given exit code.
    pub fn exits_after(&self, terminal_id: &str, delay: Duration, code: i32) {
        self.insert(
            terminal_id,
            vec![Ok(TerminalChunk::ExitCode(code))],
            false,
            delay,
        );
    }

    /// How many times `terminal_id` has been listened to.
    pub fn listens(&self, terminal_id: &str) -> usize {
        self.listens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(terminal_id)
            .copied()
            .unwrap_or(0)
    }

    fn insert(
        &self,
        terminal_id: &str,
        chunks: Vec<std::result::Result<TerminalChunk, String>>,
        hold_open: bool,
        delay: Duration,
    ) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                terminal_id.to_string(),
                Script {
                    chunks,
                    hold_open,
                    delay,
                },
            );
    }
}

#[async_trait]
impl TerminalSource for ScriptedTerminals {
    async fn listen(&self, terminal_id: &str) -> Result<TerminalStream> {
        *self
            .listens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(terminal_id.to_string())
            .or_default() += 1;

        let scripts = self.scripts.lock().unwrap_or_else(PoisonError::into_inner);
        let script = scripts
            .get(terminal_id)
            .ok_or_else(|| Error::Connect(format!("unknown terminal {terminal_id}")))?;
        let chunks: Vec<Result<TerminalChunk>> = script
            .chunks
            .iter()
            .cloned()
            .map(|chunk| chunk.map_err(Error::Feed))
            .collect();

        let delay = script.delay;
        let replay = stream::once(tokio::time::sleep(delay))
            .filter_map(|()| futures::future::ready(None))
            .chain(stream::iter(chunks));
        if script.hold_open {
            Ok(replay.chain(stream::pending()).boxed())
        } else {
            Ok(replay.boxed())
        }
    }
}
