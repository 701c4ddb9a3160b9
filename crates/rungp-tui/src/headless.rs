//! Daemon-mode renderer: every event becomes a log record.

use rungp_core::{Delivery, RenderSink};
use rungp_proto::UiEvent;
use tracing::{error, info, warn};

/// Renders events through `tracing` instead of drawing a screen.
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    delivered: usize,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events rendered so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }
}

impl RenderSink for HeadlessRenderer {
    fn deliver(&mut self, event: UiEvent) -> Delivery {
        self.delivered += 1;
        match event {
            UiEvent::PhaseStart(title) => info!("{title} starting"),
            UiEvent::PhaseDone(phase) => {
                let duration = phase.duration.unwrap_or_default();
                match phase.outcome.failure() {
                    None => info!(?duration, "{} done", phase.title()),
                    Some(failure) => error!(?duration, %failure, "{} done", phase.title()),
                }
            }
            UiEvent::LogLine(line) => info!("{line}"),
            UiEvent::DiscardLogs => {}
            UiEvent::Warning(warning) => warn!("{warning}"),
            UiEvent::SetWorkspaceAccess(access) => {
                info!(url = %access.url, ssh_port = access.ssh_port, "Workspace available");
            }
            UiEvent::Quit => return Delivery::Stop,
        }
        Delivery::Continue
    }
}
