//! Acknowledgement policy
//!
//! A single `autoAck` switch governs every monitor created by a registry.
//! The switch is read each time a message is processed, so flipping it
//! mid-stream affects only messages processed afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::message::ReceivedMessage;

/// Shared `autoAck` setting
#[derive(Debug, Clone)]
pub struct AckPolicy {
    auto_ack: Arc<AtomicBool>,
}

impl AckPolicy {
    pub fn new(auto_ack: bool) -> Self {
        Self {
            auto_ack: Arc::new(AtomicBool::new(auto_ack)),
        }
    }

    pub fn auto_ack(&self) -> bool {
        self.auto_ack.load(Ordering::Acquire)
    }

    pub fn set_auto_ack(&self, enabled: bool) {
        let previous = self.auto_ack.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            tracing::info!(auto_ack = enabled, "Auto-ack setting changed");
        }
    }
}

impl Default for AckPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Outcome of evaluating a message against the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    /// Acknowledge the message to the broker
    Ack,
    /// Leave it unacknowledged; the broker redelivers after the ack deadline
    Leave,
}

/// Per-message acknowledgement evaluator
#[derive(Debug, Clone)]
pub struct Acknowledger {
    policy: AckPolicy,
}

impl Acknowledger {
    pub fn new(policy: AckPolicy) -> Self {
        Self { policy }
    }

    /// Decide whether `message` should be acknowledged right now
    pub fn evaluate(&self, _message: &ReceivedMessage) -> AckDecision {
        if self.policy.auto_ack() {
            AckDecision::Ack
        } else {
            AckDecision::Leave
        }
    }
}
