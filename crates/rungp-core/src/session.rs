//! Session orchestration.
//!
//! A session runs the background pipeline (build, start, observe) on its own
//! task and races three completion signals against each other:
//!
//! 1. the operator quit the UI,
//! 2. the pipeline finished and reported an outcome,
//! 3. the pipeline's completion channel closed without an outcome.
//!
//! Whichever fires first decides how the session shuts down. Neither side is
//! required to ever fire; a headless session simply passes a UI future that
//! never completes.

use crate::bus::EventBus;
use crate::config::SessionConfig;
use crate::log::Log;
use rungp_proto::{Outcome, Phase};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What the pipeline receives when it starts.
#[derive(Clone)]
pub struct PipelineContext {
    pub log: Arc<dyn Log>,
    /// Root cancellation scope of the session.
    pub cancel: CancellationToken,
    pub config: SessionConfig,
}

/// Which signal ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    /// The operator quit the UI first.
    UserQuit,
    /// The pipeline finished on its own.
    PipelineFinished,
    /// The pipeline went away without reporting an outcome.
    PipelineVanished,
}

/// Final result of a session.
#[derive(Debug, Clone)]
pub struct SessionEnd {
    pub outcome: Outcome,
    pub shutdown: Shutdown,
    /// Every phase recorded during the session, in open order.
    pub phases: Vec<Phase>,
}

pub struct Session {
    config: SessionConfig,
    log: Arc<dyn Log>,
    bus: Option<EventBus>,
    cancel: CancellationToken,
}

impl Session {
    /// Creates a session. `bus` is the renderer's bus, if one is attached.
    pub fn new(config: SessionConfig, log: Arc<dyn Log>, bus: Option<EventBus>) -> Self {
        Self {
            config,
            log,
            bus,
            cancel: CancellationToken::new(),
        }
    }

    /// The session's root cancellation token.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs `pipeline` until it finishes or `ui_done` completes.
    ///
    /// If the UI finishes first, the root scope is cancelled and the pipeline
    /// gets [`SessionConfig::shutdown_timeout`] to wind down before it is
    /// aborted. If the pipeline finishes first, the renderer is told to quit.
    pub async fn run<F, Fut, U>(self, pipeline: F, ui_done: U) -> SessionEnd
    where
        F: FnOnce(PipelineContext) -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
        U: Future<Output = ()>,
    {
        let ctx = PipelineContext {
            log: Arc::clone(&self.log),
            cancel: self.cancel.clone(),
            config: self.config.clone(),
        };
        let (done_tx, mut done_rx) = oneshot::channel();
        let work = pipeline(ctx);
        let task = tokio::spawn(async move {
            let outcome = work.await;
            let _ = done_tx.send(outcome);
        });

        let ended = tokio::select! {
            () = ui_done => None,
            done = &mut done_rx => Some(done),
        };

        let (outcome, shutdown) = match ended {
            None => {
                info!("Stopping workspace");
                self.cancel.cancel();
                let outcome =
                    match tokio::time::timeout(self.config.shutdown_timeout, &mut done_rx).await {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(_)) => vanished(),
                        Err(_) => {
                            warn!(
                                timeout = ?self.config.shutdown_timeout,
                                "Background work did not stop in time; aborting"
                            );
                            task.abort();
                            Outcome::Failure("background work did not stop in time".to_string())
                        }
                    };
                (outcome, Shutdown::UserQuit)
            }
            Some(Ok(outcome)) => {
                debug!(%outcome, "Pipeline finished");
                self.quit_ui().await;
                (outcome, Shutdown::PipelineFinished)
            }
            Some(Err(_)) => {
                self.quit_ui().await;
                (vanished(), Shutdown::PipelineVanished)
            }
        };

        SessionEnd {
            outcome,
            shutdown,
            phases: self.log.ledger().snapshot(),
        }
    }

    async fn quit_ui(&self) {
        if let Some(bus) = &self.bus {
            bus.quit().await;
        }
    }
}

fn vanished() -> Outcome {
    Outcome::Failure("background work ended unexpectedly".to_string())
}
