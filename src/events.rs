//! Monitor events
//!
//! The core reports what happens to each monitor through an [`EventSink`].
//! It does not know how or where the events are displayed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::Error;
use crate::message::ReceivedMessage;
use crate::resource::SubscriptionId;

/// Notification emitted by a monitor
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    /// Streaming session is open
    Started { subscription: SubscriptionId },

    /// A message was buffered
    MessageReceived {
        subscription: SubscriptionId,
        message: Arc<ReceivedMessage>,
    },

    /// Something went wrong
    ///
    /// When `terminal` is false the monitor keeps running; when true the
    /// monitor has failed and is being removed.
    Error {
        subscription: SubscriptionId,
        error: Error,
        terminal: bool,
    },

    /// Monitor was stopped
    Stopped { subscription: SubscriptionId },
}

impl MonitorEvent {
    /// Subscription the event concerns
    pub fn subscription(&self) -> &SubscriptionId {
        match self {
            MonitorEvent::Started { subscription }
            | MonitorEvent::MessageReceived { subscription, .. }
            | MonitorEvent::Error { subscription, .. }
            | MonitorEvent::Stopped { subscription } => subscription,
        }
    }
}

/// Receiver of monitor events
///
/// `emit` is called from streamer workers and must not block.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: MonitorEvent);
}

/// Sink that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: MonitorEvent) {}
}

/// Sink that forwards events over a bounded channel
///
/// Events are dropped (and counted) when the consumer falls behind.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<MonitorEvent>,
    dropped: AtomicU64,
}

impl ChannelSink {
    /// Create a sink and the receiver for its events
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MonitorEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            tx,
            dropped: AtomicU64::new(0),
        };
        (sink, rx)
    }

    /// Events dropped because the channel was full or closed
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: MonitorEvent) {
        if let Err(e) = self.tx.try_send(event) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            match e {
                mpsc::error::TrySendError::Full(event) => tracing::debug!(
                    subscription = %event.subscription(),
                    dropped = dropped,
                    "Event channel full, dropping event"
                ),
                mpsc::error::TrySendError::Closed(_) => {}
            }
        }
    }
}
