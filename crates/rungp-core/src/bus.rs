//! Bounded, non-blocking event bus between producers and the renderer.
//!
//! Producers (the lifecycle observer, task watchers) call [`EventBus::send`],
//! which never waits: when the queue is full the event is dropped and
//! counted. A single [`forward`] loop drains the queue in order and delivers
//! each event to a [`RenderSink`]. The renderer may be slow, frozen, or gone
//! entirely; none of that reaches the producers.
//!
//! Dropped events are a lossy degradation of the display only. Phase
//! outcomes live in the [`PhaseLedger`](crate::PhaseLedger) and task
//! verdicts in the [`FailureAggregate`](crate::FailureAggregate), so the
//! session verdict never depends on what the renderer received.

use rungp_proto::UiEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace};

/// Default queue capacity.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default time [`EventBus::quit`] waits for the renderer to pick up `Quit`.
pub const DEFAULT_QUIT_GRACE: Duration = Duration::from_millis(100);

/// Sending half of the bus. Cheap to clone; every producer holds one.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::Sender<UiEvent>,
    dropped: Arc<AtomicU64>,
    quit_grace: Duration,
}

/// Receiving half of the bus, owned by the forwarder.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<UiEvent>,
}

impl EventBus {
    /// Creates a bus holding at most `capacity` undelivered events.
    pub fn new(capacity: usize) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let bus = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            quit_grace: DEFAULT_QUIT_GRACE,
        };
        (bus, EventReceiver { rx })
    }

    pub fn with_quit_grace(mut self, grace: Duration) -> Self {
        self.quit_grace = grace;
        self
    }

    /// Enqueues an event without waiting.
    ///
    /// Returns `false` if the event was dropped because the queue is full or
    /// the forwarder is gone.
    pub fn send(&self, event: UiEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                trace!(kind = event.kind(), dropped, "Event bus full; dropping event");
                false
            }
            Err(TrySendError::Closed(event)) => {
                trace!(kind = event.kind(), "Event bus closed; dropping event");
                false
            }
        }
    }

    /// Asks the renderer to stop, then gives it a short grace period.
    ///
    /// Never waits longer than the grace period, whether or not a renderer
    /// is attached.
    pub async fn quit(&self) {
        if !self.send(UiEvent::Quit) {
            debug!("Quit event could not be enqueued");
        }
        tokio::time::sleep(self.quit_grace).await;
    }

    /// Number of events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Returns true once the receiving side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventReceiver {
    /// Waits for the next event. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<UiEvent> {
        self.rx.recv().await
    }

    /// Takes the next event if one is queued.
    pub fn try_recv(&mut self) -> Option<UiEvent> {
        self.rx.try_recv().ok()
    }
}

/// Whether the forwarder should keep delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Continue,
    Stop,
}

/// Something that displays UI events.
pub trait RenderSink: Send {
    fn deliver(&mut self, event: UiEvent) -> Delivery;
}

/// Delivers queued events to `sink` in enqueue order.
///
/// Stops after delivering `Quit`, when the sink asks to stop, or when every
/// sender is gone. Returns the sink.
pub async fn forward<S: RenderSink>(mut rx: EventReceiver, mut sink: S) -> S {
    while let Some(event) = rx.recv().await {
        let quit = matches!(event, UiEvent::Quit);
        if sink.deliver(event) == Delivery::Stop || quit {
            break;
        }
    }
    debug!("Event forwarder stopped");
    sink
}
