//! Client for the in-workspace supervisor's HTTP gateway.
//!
//! Both feeds are server-streamed: the response body is newline-delimited
//! JSON, one `{"result": ...}` or `{"error": ...}` frame per line.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use rungp_core::LineBuffer;
use rungp_proto::{
    Error, Result, TaskDescriptor, TaskState, TaskStatusSource, TaskStatusStream, TerminalChunk,
    TerminalSource, TerminalStream,
};
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::debug;

const STATUS_PATH: &str = "/_supervisor/v1/status/tasks/observe/true";
const LISTEN_PATH: &str = "/_supervisor/v1/terminal/listen";
/// Longest NDJSON frame accepted before the stream is treated as corrupt.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct Frame<T> {
    result: Option<T>,
    error: Option<FrameError>,
}

#[derive(Debug, Deserialize)]
struct FrameError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i32,
}

#[derive(Debug, Default, Deserialize)]
struct TasksFrame {
    #[serde(default)]
    tasks: Vec<TaskStatus>,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    id: String,
    /// Omitted while the task is still opening.
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    terminal: String,
    #[serde(default)]
    presentation: Option<Presentation>,
}

#[derive(Debug, Deserialize)]
struct Presentation {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListenFrame {
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    exit_code: Option<i32>,
}

impl From<TaskStatus> for TaskDescriptor {
    fn from(status: TaskStatus) -> Self {
        let state = match status.state.as_deref() {
            Some("running") => TaskState::Running,
            Some("closed") => TaskState::Closed,
            _ => TaskState::Opening,
        };
        TaskDescriptor {
            id: status.id,
            presentation_name: status.presentation.map(|p| p.name).unwrap_or_default(),
            terminal_id: status.terminal,
            state,
        }
    }
}

fn unwrap_frame<T: for<'de> Deserialize<'de>>(line: &str) -> Result<Option<T>> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    let frame: Frame<T> =
        serde_json::from_str(line).map_err(|e| Error::Feed(format!("malformed frame: {e}")))?;
    if let Some(err) = frame.error {
        return Err(Error::Feed(format!("{} (code {})", err.message, err.code)));
    }
    Ok(frame.result)
}

/// Decodes one status feed line. Blank lines yield `None`.
pub fn decode_status_frame(line: &str) -> Result<Option<Vec<TaskDescriptor>>> {
    Ok(unwrap_frame::<TasksFrame>(line)?
        .map(|frame| frame.tasks.into_iter().map(TaskDescriptor::from).collect()))
}

/// Decodes one terminal feed line. Frames without output or exit code
/// (title changes) yield `None`.
pub fn decode_terminal_frame(line: &str) -> Result<Option<TerminalChunk>> {
    let Some(frame) = unwrap_frame::<ListenFrame>(line)? else {
        return Ok(None);
    };
    if let Some(code) = frame.exit_code {
        return Ok(Some(TerminalChunk::ExitCode(code)));
    }
    match frame.data {
        Some(data) => {
            let bytes = STANDARD
                .decode(data.as_bytes())
                .map_err(|e| Error::Feed(format!("invalid terminal data: {e}")))?;
            Ok(Some(TerminalChunk::Data(bytes)))
        }
        None => Ok(None),
    }
}

/// Talks to the supervisor published on a host port.
#[derive(Debug, Clone)]
pub struct SupervisorClient {
    client: Client,
    base_url: String,
}

impl SupervisorClient {
    pub fn new(port: u16) -> Result<Self> {
        Self::with_base_url(format!("http://localhost:{port}"))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        // No overall timeout: both feeds stay open for the session's lifetime.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| Error::Connect(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn open(&self, path: &str) -> Result<BoxStream<'static, Result<String>>> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "Opening supervisor feed");
        let response = self
            .client
            .get(&url)
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| Error::Connect(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Connect(format!("{path}: {status} {}", body.trim())));
        }

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .boxed();
        Ok(ndjson_lines(body))
    }
}

struct Lines {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buffer: LineBuffer,
    ready: VecDeque<String>,
    done: bool,
}

fn ndjson_lines(
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
) -> BoxStream<'static, Result<String>> {
    let state = Lines {
        body,
        buffer: LineBuffer::with_limit(MAX_FRAME_LEN),
        ready: VecDeque::new(),
        done: false,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.ready.pop_front() {
                return Some((Ok(line), st));
            }
            if st.done {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => st.ready.extend(st.buffer.push(&bytes)),
                Some(Err(e)) => {
                    st.done = true;
                    return Some((Err(Error::Feed(e.to_string())), st));
                }
                None => {
                    st.done = true;
                    st.ready.extend(st.buffer.finish());
                }
            }
        }
    })
    .boxed()
}

#[async_trait]
impl TaskStatusSource for SupervisorClient {
    async fn observe(&self) -> Result<TaskStatusStream> {
        let lines = self.open(STATUS_PATH).await?;
        Ok(lines
            .filter_map(|line| async move {
                match line {
                    Ok(line) => decode_status_frame(&line).transpose(),
                    Err(e) => Some(Err(e)),
                }
            })
            .boxed())
    }
}

#[async_trait]
impl TerminalSource for SupervisorClient {
    async fn listen(&self, terminal_id: &str) -> Result<TerminalStream> {
        let lines = self.open(&format!("{LISTEN_PATH}/{terminal_id}")).await?;
        Ok(lines
            .filter_map(|line| async move {
                match line {
                    Ok(line) => decode_terminal_frame(&line).transpose(),
                    Err(e) => Some(Err(e)),
                }
            })
            .boxed())
    }
}
