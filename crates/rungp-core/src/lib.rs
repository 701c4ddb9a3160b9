//! # rungp-core
//!
//! Observes a local workspace as it boots and reports what is happening to
//! a renderer without ever blocking on it.
//!
//! This crate provides:
//! - The phase ledger, an ordered record of boot phases and their outcomes
//! - A bounded, non-blocking event bus between producers and the renderer
//! - The `Log` capability with silent, console and bus-backed variants
//! - The lifecycle observer that classifies container output into phases
//! - Task supervision over the in-workspace supervisor's status and terminal feeds
//! - The session orchestrator that reconciles operator quit with background completion
//! - Run configuration

pub mod bus;
mod config;
mod ledger;
mod log;
pub mod observer;
mod session;
pub mod supervisor;
pub mod testing;
mod watcher;
mod writer;

pub use bus::{Delivery, EventBus, EventReceiver, RenderSink, forward};
pub use config::{
    AutoUpdateConfig, ConfigError, RunConfig, RuntimeKind, SessionConfig, TelemetryConfig,
};
pub use ledger::{PhaseHandle, PhaseLedger};
pub use log::{BusLog, ConsoleLog, Log, SilentLog};
pub use observer::{
    Classifier, Marker, Observation, ObservationReport, ObserveOptions, ObserverSink, Step,
    TaskFeeds, observe,
};
pub use session::{PipelineContext, Session, SessionEnd, Shutdown};
pub use supervisor::{DEFAULT_CLOSE_DRAIN, FailureAggregate, SupervisionReport, TaskSupervisor};
pub use watcher::{TaskWatcher, WatchVerdict};
pub use writer::{LineBuffer, LineSink, LogWriter, MAX_LINE_LEN};
