//! # rungp-tui
//!
//! Renderers that attach to the rungp event bus.
//!
//! Built with `ratatui`, this crate provides:
//! - A pure [`UiModel`] reducer over UI events
//! - An interactive full-screen view of boot phases and the log tail
//! - A headless renderer that turns events into log lines for daemon mode

mod app;
mod headless;
mod model;
mod widgets;

pub use app::App;
pub use headless::HeadlessRenderer;
pub use model::{LOG_TAIL, SharedModel, UiModel};
