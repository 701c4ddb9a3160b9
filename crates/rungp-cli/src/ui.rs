//! Picks and attaches the renderer for a session.

use clap::ValueEnum;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use rungp_core::{BusLog, EventBus, Log, SessionConfig, forward};
use rungp_tui::{App, HeadlessRenderer, SharedModel};
use std::io::{IsTerminal, stdout};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How the session is displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum UiMode {
    /// Interactive if stdout is a TTY, daemon otherwise
    #[default]
    Auto,
    /// Plain log lines, no terminal control
    Daemon,
    /// Full-screen view
    Interactive,
}

impl UiMode {
    /// Verbose output always uses daemon mode so log lines stay readable.
    pub fn resolve(self, verbose: bool) -> Self {
        if verbose {
            return UiMode::Daemon;
        }
        match self {
            UiMode::Auto if stdout().is_terminal() => UiMode::Interactive,
            UiMode::Auto => UiMode::Daemon,
            mode => mode,
        }
    }

    pub fn is_interactive(self) -> bool {
        self == UiMode::Interactive
    }
}

/// A renderer attached to a session's event bus.
pub struct AttachedUi {
    /// Log capability publishing onto the bus.
    pub log: Arc<dyn Log>,
    pub bus: EventBus,
    done: Shared<BoxFuture<'static, ()>>,
}

impl AttachedUi {
    /// Completes when the operator quit or the renderer stopped.
    pub fn done(&self) -> Shared<BoxFuture<'static, ()>> {
        self.done.clone()
    }

    /// Gives the renderer up to `limit` to draw its last frame and restore
    /// the terminal.
    pub async fn wait(self, limit: Duration) {
        if tokio::time::timeout(limit, self.done).await.is_err() {
            debug!("Renderer did not stop in time");
        }
    }
}

/// Creates the event bus for `config` and starts a renderer on it.
///
/// Must be called from within a tokio runtime.
pub fn attach(mode: UiMode, config: &SessionConfig) -> AttachedUi {
    let (bus, rx) = config.event_bus();
    let log: Arc<dyn Log> = Arc::new(BusLog::new(bus.clone()));

    let done: BoxFuture<'static, ()> = if mode.is_interactive() {
        let model = SharedModel::new();
        tokio::spawn(forward(rx, model.clone()));
        let app = tokio::spawn(async move {
            if let Err(e) = App::new(model).run().await {
                warn!("Renderer failed: {e:#}");
            }
        });
        async move {
            let _ = app.await;
        }
        .boxed()
    } else {
        let renderer = tokio::spawn(async move {
            tokio::select! {
                renderer = forward(rx, HeadlessRenderer::new()) => {
                    debug!(delivered = renderer.delivered(), "Renderer stopped");
                }
                _ = tokio::signal::ctrl_c() => {
                    debug!("Interrupted");
                }
            }
        });
        async move {
            let _ = renderer.await;
        }
        .boxed()
    };

    AttachedUi {
        log,
        bus,
        done: done.shared(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rungp_proto::UiEvent;

    #[test]
    fn test_verbose_forces_daemon() {
        assert_eq!(UiMode::Interactive.resolve(true), UiMode::Daemon);
        assert_eq!(UiMode::Auto.resolve(true), UiMode::Daemon);
        assert_eq!(UiMode::Interactive.resolve(false), UiMode::Interactive);
        assert_eq!(UiMode::Daemon.resolve(false), UiMode::Daemon);
    }

    #[tokio::test]
    async fn test_headless_renderer_stops_on_quit() {
        let ui = attach(UiMode::Daemon, &SessionConfig::default());
        ui.log.start_phase("building", "workspace image").success();
        ui.bus.send(UiEvent::Quit);

        tokio::time::timeout(Duration::from_secs(5), ui.done())
            .await
            .expect("headless renderer should stop on quit");
        assert_eq!(ui.log.ledger().len(), 1);
    }
}
