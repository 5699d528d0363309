//! Monitor entries and handles
//!
//! This module defines the per-monitor state stored in the registry and the
//! cloneable handle given to callers.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::buffer::MessageBuffer;
use crate::error::Result;
use crate::message::ReceivedMessage;
use crate::resource::{SubscriptionId, TopicId};
use crate::stats::{MonitorStats, StatsSnapshot};
use crate::streamer::{MessageStreamer, MonitorState, MonitorStatus};

/// Caller-facing view of one monitor
///
/// Holding a handle keeps its buffer readable after the monitor has been
/// removed from the registry.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    subscription: SubscriptionId,
    topic: Option<TopicId>,
    buffer: Arc<MessageBuffer>,
    status: Arc<MonitorStatus>,
    stats: Arc<MonitorStats>,
}

impl MonitorHandle {
    pub fn subscription(&self) -> &SubscriptionId {
        &self.subscription
    }

    /// Topic this monitor observes, for topic monitors
    pub fn topic(&self) -> Option<&TopicId> {
        self.topic.as_ref()
    }

    pub fn state(&self) -> MonitorState {
        self.status.get()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Buffered messages, oldest first
    pub fn messages(&self) -> Vec<Arc<ReceivedMessage>> {
        self.buffer.snapshot()
    }

    pub fn buffer(&self) -> &Arc<MessageBuffer> {
        &self.buffer
    }

    pub fn clear(&self) {
        self.buffer.clear();
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Receiver notified on every state change
    pub fn watch_state(&self) -> watch::Receiver<MonitorState> {
        self.status.subscribe()
    }

    /// Wait until the monitor reaches a state matching `predicate`
    pub async fn wait_for_state(
        &self,
        predicate: impl FnMut(&MonitorState) -> bool,
    ) -> MonitorState {
        self.status.wait_for(predicate).await
    }

    /// Ptr-equality: both handles refer to the same monitor instance
    pub fn same_monitor(&self, other: &MonitorHandle) -> bool {
        Arc::ptr_eq(&self.status, &other.status)
    }
}

/// Records that a topic monitor owns a temporary subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMonitorLink {
    pub topic: TopicId,
    pub subscription: SubscriptionId,
}

/// Entry for a single monitor in the registry
pub(super) struct MonitorEntry {
    /// Distinguishes successive monitors of the same subscription
    pub(super) generation: u64,
    pub(super) handle: MonitorHandle,
    streamer: tokio::sync::Mutex<MessageStreamer>,
    /// Task that removes the entry if the monitor fails
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorEntry {
    pub(super) fn new(generation: u64, topic: Option<TopicId>, streamer: MessageStreamer) -> Self {
        let handle = MonitorHandle {
            subscription: streamer.subscription().clone(),
            topic,
            buffer: Arc::clone(streamer.buffer()),
            status: Arc::clone(streamer.status()),
            stats: Arc::clone(streamer.stats()),
        };

        Self {
            generation,
            handle,
            streamer: tokio::sync::Mutex::new(streamer),
            reaper: Mutex::new(None),
        }
    }

    /// Start the streamer, then install the reaper built by `spawn_reaper`
    pub(super) async fn start(&self, spawn_reaper: impl FnOnce() -> JoinHandle<()>) -> Result<()> {
        let mut streamer = self.streamer.lock().await;
        streamer.start().await?;
        *self.reaper.lock() = Some(spawn_reaper());
        Ok(())
    }

    /// Stop the streamer and cancel the reaper
    pub(super) async fn stop(&self) -> Result<()> {
        let mut streamer = self.streamer.lock().await;
        let reaper = self.reaper.lock().take();
        if let Some(reaper) = reaper {
            reaper.abort();
        }
        streamer.stop().await
    }
}
