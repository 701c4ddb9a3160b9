//! Test doubles for driving the core without a container or supervisor.
//!
//! - [`ScriptedTaskFeed`] replays task status snapshots pushed by a test.
//! - [`ScriptedTerminals`] replays canned terminal output per terminal id.
//! - [`RecordingLog`] and [`RecordingSink`] capture what the core reports.

mod feeds;
mod recording;

pub use feeds::{FeedController, ScriptedTaskFeed, ScriptedTerminals, closed, opening, running};
pub use recording::{RecordingLog, RecordingSink};
