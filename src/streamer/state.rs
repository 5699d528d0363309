//! Monitor state machine
//!
//! Tracks a monitor from creation through streaming, reconnects and
//! shutdown. The current state lives in a `watch` channel so that callers
//! can await transitions.

use std::fmt;

use tokio::sync::watch;

/// Monitor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MonitorState {
    /// Created, not started
    Idle,
    /// Handshake in progress
    Starting,
    /// Session open, messages flowing
    Streaming,
    /// Session interrupted by a transient failure
    Error,
    /// Waiting out backoff or reopening the session
    Reconnecting,
    /// Stop requested, worker draining
    Stopping,
    /// Stopped on request
    Stopped,
    /// Ended by a permanent failure
    Failed,
}

impl MonitorState {
    /// Whether the monitor still counts as running
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// Whether the monitor has ended
    pub fn is_terminal(self) -> bool {
        matches!(self, MonitorState::Stopped | MonitorState::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: MonitorState) -> bool {
        use MonitorState::*;

        matches!(
            (self, next),
            (Idle, Starting)
                | (Idle, Stopping)
                | (Starting, Streaming)
                | (Starting, Failed)
                | (Starting, Stopping)
                | (Streaming, Error)
                | (Streaming, Failed)
                | (Streaming, Stopping)
                | (Error, Reconnecting)
                | (Error, Failed)
                | (Error, Stopping)
                | (Reconnecting, Streaming)
                | (Reconnecting, Error)
                | (Reconnecting, Failed)
                | (Reconnecting, Stopping)
                | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorState::Idle => "idle",
            MonitorState::Starting => "starting",
            MonitorState::Streaming => "streaming",
            MonitorState::Error => "error",
            MonitorState::Reconnecting => "reconnecting",
            MonitorState::Stopping => "stopping",
            MonitorState::Stopped => "stopped",
            MonitorState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Observable state cell for one monitor
#[derive(Debug)]
pub struct MonitorStatus {
    tx: watch::Sender<MonitorState>,
}

impl MonitorStatus {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(MonitorState::Idle);
        Self { tx }
    }

    /// Current state
    pub fn get(&self) -> MonitorState {
        *self.tx.borrow()
    }

    /// Move to `next` if the transition is legal
    ///
    /// Returns whether the state changed.
    pub(crate) fn transition(&self, next: MonitorState) -> bool {
        let mut from = MonitorState::Idle;
        let applied = self.tx.send_if_modified(|state| {
            from = *state;
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });

        if !applied {
            tracing::debug!(from = %from, to = %next, "Ignoring state transition");
        }
        applied
    }

    /// Receiver notified on every transition
    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.tx.subscribe()
    }

    /// Wait until the state satisfies `predicate`
    pub async fn wait_for(&self, predicate: impl FnMut(&MonitorState) -> bool) -> MonitorState {
        let mut rx = self.tx.subscribe();
        let reached = rx.wait_for(predicate).await.map(|state| *state);
        reached.unwrap_or_else(|_| self.get())
    }
}

impl Default for MonitorStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_happy_lifecycle() {
        let status = MonitorStatus::new();
        assert_eq!(status.get(), MonitorState::Idle);

        assert!(status.transition(MonitorState::Starting));
        assert!(status.transition(MonitorState::Streaming));
        assert!(status.transition(MonitorState::Error));
        assert!(status.transition(MonitorState::Reconnecting));
        assert!(status.transition(MonitorState::Streaming));
        assert!(status.transition(MonitorState::Stopping));
        assert!(status.transition(MonitorState::Stopped));
        assert!(status.get().is_terminal());
    }

    #[test]
    fn test_failed_is_final() {
        let status = MonitorStatus::new();
        status.transition(MonitorState::Starting);
        assert!(status.transition(MonitorState::Failed));

        assert!(!status.transition(MonitorState::Stopping));
        assert!(!status.transition(MonitorState::Streaming));
        assert_eq!(status.get(), MonitorState::Failed);
    }

    #[test]
    fn test_illegal_transitions_ignored() {
        let status = MonitorStatus::new();
        assert!(!status.transition(MonitorState::Streaming));
        assert!(!status.transition(MonitorState::Stopped));
        assert_eq!(status.get(), MonitorState::Idle);

        status.transition(MonitorState::Starting);
        status.transition(MonitorState::Streaming);
        status.transition(MonitorState::Stopping);
        // A failure reported while stopping does not override the stop
        assert!(!status.transition(MonitorState::Failed));
    }

    #[test]
    fn test_active_states() {
        assert!(MonitorState::Idle.is_active());
        assert!(MonitorState::Reconnecting.is_active());
        assert!(MonitorState::Stopping.is_active());
        assert!(!MonitorState::Stopped.is_active());
        assert!(!MonitorState::Failed.is_active());
    }

    #[tokio::test]
    async fn test_wait_for_transition() {
        let status = Arc::new(MonitorStatus::new());

        let waiter = {
            let status = Arc::clone(&status);
            tokio::spawn(async move { status.wait_for(|s| *s == MonitorState::Streaming).await })
        };

        status.transition(MonitorState::Starting);
        status.transition(MonitorState::Streaming);

        assert_eq!(waiter.await.unwrap(), MonitorState::Streaming);
    }
}
