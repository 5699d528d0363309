//! Per-subscription processing loop
//!
//! One worker task owns the live [`PullStream`] of a monitor. It processes
//! deliveries strictly in order and reopens the stream after transient
//! failures.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::watch;

use super::backoff::ReconnectPolicy;
use super::state::{MonitorState, MonitorStatus};
use crate::ack::{AckDecision, Acknowledger};
use crate::buffer::MessageBuffer;
use crate::client::{BrokerClient, PullStream};
use crate::error::Error;
use crate::events::{EventSink, MonitorEvent};
use crate::message::{RawMessage, ReceivedMessage};
use crate::resource::SubscriptionId;
use crate::stats::MonitorStats;

pub(super) struct Worker {
    pub(super) subscription: SubscriptionId,
    pub(super) buffer: Arc<MessageBuffer>,
    pub(super) status: Arc<MonitorStatus>,
    pub(super) stats: Arc<MonitorStats>,
    pub(super) acknowledger: Acknowledger,
    pub(super) broker: Arc<dyn BrokerClient>,
    pub(super) sink: Arc<dyn EventSink>,
    pub(super) reconnect: ReconnectPolicy,
    pub(super) shutdown: watch::Receiver<bool>,
    /// Consecutive failures within the current outage
    pub(super) failures: u32,
}

impl Worker {
    /// Drive `stream` until stopped or failed
    pub(super) async fn run(mut self, mut stream: Box<dyn PullStream>) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.changed() => return,
                next = stream.next() => next,
            };

            let error = match next {
                Ok(Some(raw)) => {
                    self.failures = 0;
                    self.process(stream.as_mut(), raw).await;
                    continue;
                }
                Ok(None) => Error::Transient("stream closed by server".into()),
                Err(e) => e,
            };

            if !error.is_transient() {
                self.fail(error);
                return;
            }

            match self.reconnect(error).await {
                Some(reopened) => stream = reopened,
                None => return,
            }
        }
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Decode, buffer, notify, then acknowledge one delivery
    async fn process(&self, stream: &mut dyn PullStream, raw: RawMessage) {
        let (message, ack_id) = match ReceivedMessage::decode(raw, SystemTime::now()) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.stats.record_decode_failure();
                tracing::warn!(subscription = %self.subscription, error = %e, "Dropping undecodable delivery");
                self.sink.emit(MonitorEvent::Error {
                    subscription: self.subscription.clone(),
                    error: e,
                    terminal: false,
                });
                return;
            }
        };

        if self.stopping() {
            return;
        }

        let message = Arc::new(message);
        if self.buffer.append(Arc::clone(&message)).is_some() {
            self.stats.record_evicted();
        }
        self.stats.record_received();

        tracing::debug!(
            subscription = %self.subscription,
            message_id = %message.id,
            size = message.size(),
            "Message received"
        );

        self.sink.emit(MonitorEvent::MessageReceived {
            subscription: self.subscription.clone(),
            message: Arc::clone(&message),
        });

        match self.acknowledger.evaluate(&message) {
            AckDecision::Ack => match stream.ack(&ack_id).await {
                Ok(()) => self.stats.record_acked(),
                Err(e) => {
                    self.stats.record_ack_failure();
                    tracing::warn!(
                        subscription = %self.subscription,
                        message_id = %message.id,
                        error = %e,
                        "Ack failed, message will be redelivered"
                    );
                }
            },
            AckDecision::Leave => self.stats.record_left_unacked(),
        }
    }

    /// Back off and reopen the session
    ///
    /// Returns `None` when stopped or when the monitor failed.
    async fn reconnect(&mut self, mut error: Error) -> Option<Box<dyn PullStream>> {
        loop {
            self.failures += 1;
            if self.failures > self.reconnect.max_attempts {
                self.fail(Error::Fatal(format!(
                    "giving up after {} reconnect attempts: {}",
                    self.reconnect.max_attempts, error
                )));
                return None;
            }

            self.status.transition(MonitorState::Error);
            tracing::warn!(
                subscription = %self.subscription,
                attempt = self.failures,
                error = %error,
                "Stream interrupted, reconnecting"
            );
            self.sink.emit(MonitorEvent::Error {
                subscription: self.subscription.clone(),
                error,
                terminal: false,
            });
            self.status.transition(MonitorState::Reconnecting);

            let delay = self.reconnect.delay(self.failures - 1);
            tokio::select! {
                biased;
                _ = self.shutdown.changed() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            let opened = tokio::select! {
                biased;
                _ = self.shutdown.changed() => return None,
                opened = self.broker.open_stream(&self.subscription) => opened,
            };

            match opened {
                Ok(stream) => {
                    if !self.status.transition(MonitorState::Streaming) {
                        return None;
                    }
                    self.stats.record_reconnect();
                    tracing::info!(
                        subscription = %self.subscription,
                        attempt = self.failures,
                        "Stream reconnected"
                    );
                    self.failures = 0;
                    return Some(stream);
                }
                Err(e) if e.is_transient() => error = e,
                Err(e) => {
                    self.fail(e);
                    return None;
                }
            }
        }
    }

    /// Mark the monitor failed and emit the terminal event
    fn fail(&self, error: Error) {
        if !self.status.transition(MonitorState::Failed) {
            // Already stopping; the stop wins
            return;
        }

        tracing::error!(subscription = %self.subscription, error = %error, "Monitor failed");
        self.sink.emit(MonitorEvent::Error {
            subscription: self.subscription.clone(),
            error,
            terminal: true,
        });
    }
}
