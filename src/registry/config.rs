//! Registry configuration

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::streamer::{ReconnectPolicy, StreamerSettings};

/// Configuration for a [`MonitorRegistry`](super::MonitorRegistry)
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Messages retained per monitor (at least 1)
    pub buffer_capacity: usize,

    /// Initial value of the process-wide auto-ack setting
    pub auto_ack: bool,

    /// How long stopping a monitor waits for its worker to drain
    pub stop_timeout: Duration,

    /// Backoff used after transient stream failures
    pub reconnect: ReconnectPolicy,

    /// Name prefix for the disposable subscriptions of topic monitors
    pub temp_subscription_prefix: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 500,
            auto_ack: true,
            stop_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
            temp_subscription_prefix: "monitor-".to_string(),
        }
    }
}

impl MonitorConfig {
    /// Set the per-monitor buffer capacity (clamped to at least 1)
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }

    /// Set the initial auto-ack value
    pub fn auto_ack(mut self, enabled: bool) -> Self {
        self.auto_ack = enabled;
        self
    }

    /// Set the stop timeout
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Set the reconnect policy
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the temporary subscription name prefix
    pub fn temp_subscription_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.temp_subscription_prefix = prefix.into();
        self
    }

    pub(crate) fn capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.buffer_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub(crate) fn streamer_settings(&self) -> StreamerSettings {
        StreamerSettings {
            reconnect: self.reconnect.clone(),
            stop_timeout: self.stop_timeout,
        }
    }
}
