//! Notifications from the server callback context
//!
//! Callbacks run on a thread the server owns and must not touch the model.
//! They push a small immutable [`ServerEvent`] into a bounded queue and
//! return; the consumer drains the queue in arrival order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, warn};

use crate::server::ClientUuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyChange {
    Created,
    Changed,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerEvent {
    PortRegistered { name: String },
    PortUnregistered { name: String },
    /// Either order; the translator works out which side is the output
    PortsConnected { a: String, b: String },
    PortsDisconnected { a: String, b: String },
    PortRenamed { old: String, new: String },
    ClientRenamed { old: String, new: String },
    PropertyChanged {
        subject: ClientUuid,
        key: String,
        change: PropertyChange,
    },
    Xrun,
    BufferSizeChanged { frames: u32 },
    SampleRateChanged { rate: u32 },
    Shutdown,
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PortRegistered { .. } => "port_registered",
            Self::PortUnregistered { .. } => "port_unregistered",
            Self::PortsConnected { .. } => "ports_connected",
            Self::PortsDisconnected { .. } => "ports_disconnected",
            Self::PortRenamed { .. } => "port_renamed",
            Self::ClientRenamed { .. } => "client_renamed",
            Self::PropertyChanged { .. } => "property_changed",
            Self::Xrun => "xrun",
            Self::BufferSizeChanged { .. } => "buffer_size_changed",
            Self::SampleRateChanged { .. } => "sample_rate_changed",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    overflowed: AtomicBool,
    dropped: AtomicU64,
}

/// Producer half, handed to the server's callback context
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<ServerEvent>,
    state: Arc<QueueState>,
}

impl EventSender {
    /// Queue an event without blocking.
    ///
    /// A full queue drops the event and flags the receiver for a full resync,
    /// since later events can no longer be applied in order.
    pub fn notify(&self, event: ServerEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.state.dropped.fetch_add(1, Ordering::Relaxed);
                if !self.state.overflowed.swap(true, Ordering::AcqRel) {
                    warn!(
                        "event queue full, dropped {}; graph will be resynced",
                        event.kind()
                    );
                }
            }
            Err(TrySendError::Closed(event)) => {
                debug!("event consumer gone, discarding {}", event.kind());
            }
        }
    }

    /// Events dropped on a full queue since the channel was created
    pub fn dropped(&self) -> u64 {
        self.state.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer half, owned by the thread that owns the model
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<ServerEvent>,
    state: Arc<QueueState>,
}

impl EventReceiver {
    /// Next queued event, if any, without waiting
    pub fn try_next(&mut self) -> Option<ServerEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait for the next event. `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }

    /// Whether events were dropped since the last call; clears the flag.
    pub fn take_overflow(&self) -> bool {
        self.state.overflowed.swap(false, Ordering::AcqRel)
    }
}

/// Create the bounded callback -> consumer queue.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let state = Arc::new(QueueState::default());
    (
        EventSender {
            tx,
            state: Arc::clone(&state),
        },
        EventReceiver { rx, state },
    )
}
