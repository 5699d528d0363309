//! Per-monitor counters

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters for one monitor
///
/// Written by the streamer worker, read by anyone holding the handle.
#[derive(Debug)]
pub struct MonitorStats {
    started_at: Instant,
    received: AtomicU64,
    acked: AtomicU64,
    left_unacked: AtomicU64,
    ack_failures: AtomicU64,
    decode_failures: AtomicU64,
    evicted: AtomicU64,
    reconnects: AtomicU64,
}

impl MonitorStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            received: AtomicU64::new(0),
            acked: AtomicU64::new(0),
            left_unacked: AtomicU64::new(0),
            ack_failures: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_left_unacked(&self) {
        self.left_unacked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ack_failure(&self) {
        self.ack_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Time since the monitor was created
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            left_unacked: self.left_unacked.load(Ordering::Relaxed),
            ack_failures: self.ack_failures.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            uptime: self.uptime(),
        }
    }
}

impl Default for MonitorStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of a monitor's counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages decoded and buffered
    pub received: u64,
    /// Messages acknowledged to the broker
    pub acked: u64,
    /// Messages left for redelivery because auto-ack was off
    pub left_unacked: u64,
    /// Acknowledgements the broker rejected
    pub ack_failures: u64,
    /// Deliveries that could not be decoded
    pub decode_failures: u64,
    /// Messages evicted from the buffer
    pub evicted: u64,
    /// Successful reconnects after a transient failure
    pub reconnects: u64,
    /// Time since the monitor was created
    pub uptime: Duration,
}

impl StatsSnapshot {
    /// Messages received per second over the monitor's lifetime
    pub fn receive_rate(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.received as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stats_are_zero() {
        let snapshot = MonitorStats::new().snapshot();
        assert_eq!(snapshot.received, 0);
        assert_eq!(snapshot.acked, 0);
        assert_eq!(snapshot.left_unacked, 0);
        assert_eq!(snapshot.ack_failures, 0);
        assert_eq!(snapshot.decode_failures, 0);
        assert_eq!(snapshot.evicted, 0);
        assert_eq!(snapshot.reconnects, 0);
    }

    #[test]
    fn test_counters() {
        let stats = MonitorStats::new();
        stats.record_received();
        stats.record_received();
        stats.record_acked();
        stats.record_left_unacked();
        stats.record_evicted();
        stats.record_reconnect();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.acked, 1);
        assert_eq!(snapshot.left_unacked, 1);
        assert_eq!(snapshot.evicted, 1);
        assert_eq!(snapshot.reconnects, 1);
    }

    #[test]
    fn test_receive_rate_zero_uptime() {
        let snapshot = StatsSnapshot {
            received: 10,
            ..Default::default()
        };
        assert_eq!(snapshot.receive_rate(), 0.0);
    }

    #[test]
    fn test_receive_rate() {
        let snapshot = StatsSnapshot {
            received: 100,
            uptime: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(snapshot.receive_rate(), 10.0);
    }
}
