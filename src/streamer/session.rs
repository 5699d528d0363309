//! Message streamer
//!
//! A [`MessageStreamer`] owns the streaming-pull session of one
//! subscription. `start` performs the handshake and spawns the worker;
//! `stop` signals it and waits, bounded, for it to drain.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::backoff::ReconnectPolicy;
use super::state::{MonitorState, MonitorStatus};
use super::worker::Worker;
use crate::ack::Acknowledger;
use crate::buffer::MessageBuffer;
use crate::client::{Collaborators, PullStream};
use crate::error::{Error, Result};
use crate::events::MonitorEvent;
use crate::resource::SubscriptionId;
use crate::stats::MonitorStats;

/// Timing knobs for a streamer
#[derive(Debug, Clone)]
pub struct StreamerSettings {
    /// Backoff applied after transient failures
    pub reconnect: ReconnectPolicy,
    /// How long `stop` waits for the worker before aborting it
    pub stop_timeout: Duration,
}

impl Default for StreamerSettings {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Streaming session and worker for one subscription
pub struct MessageStreamer {
    subscription: SubscriptionId,
    buffer: Arc<MessageBuffer>,
    status: Arc<MonitorStatus>,
    stats: Arc<MonitorStats>,
    acknowledger: Acknowledger,
    collaborators: Collaborators,
    settings: StreamerSettings,
    shutdown_tx: Option<watch::Sender<bool>>,
    worker: Option<JoinHandle<()>>,
}

impl MessageStreamer {
    /// Create an idle streamer writing into `buffer`
    pub fn new(
        subscription: SubscriptionId,
        buffer: Arc<MessageBuffer>,
        acknowledger: Acknowledger,
        collaborators: Collaborators,
        settings: StreamerSettings,
    ) -> Self {
        Self {
            subscription,
            buffer,
            status: Arc::new(MonitorStatus::new()),
            stats: Arc::new(MonitorStats::new()),
            acknowledger,
            collaborators,
            settings,
            shutdown_tx: None,
            worker: None,
        }
    }

    pub fn subscription(&self) -> &SubscriptionId {
        &self.subscription
    }

    pub fn buffer(&self) -> &Arc<MessageBuffer> {
        &self.buffer
    }

    pub fn status(&self) -> &Arc<MonitorStatus> {
        &self.status
    }

    pub fn stats(&self) -> &Arc<MonitorStats> {
        &self.stats
    }

    pub fn state(&self) -> MonitorState {
        self.status.get()
    }

    /// Validate the subscription, open the session and spawn the worker
    ///
    /// Returns once the session is open; messages are processed in the
    /// background. Handshake failures leave the streamer `Failed`.
    pub async fn start(&mut self) -> Result<()> {
        if !self.status.transition(MonitorState::Starting) {
            let state = self.status.get();
            return if state.is_active() {
                Ok(())
            } else {
                Err(Error::Fatal(format!(
                    "monitor for {} is {}",
                    self.subscription, state
                )))
            };
        }

        let stream = match self.handshake().await {
            Ok(stream) => stream,
            Err(e) => {
                self.status.transition(MonitorState::Failed);
                tracing::warn!(subscription = %self.subscription, error = %e, "Handshake failed");
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = Worker {
            subscription: self.subscription.clone(),
            buffer: Arc::clone(&self.buffer),
            status: Arc::clone(&self.status),
            stats: Arc::clone(&self.stats),
            acknowledger: self.acknowledger.clone(),
            broker: Arc::clone(&self.collaborators.broker),
            sink: Arc::clone(&self.collaborators.sink),
            reconnect: self.settings.reconnect.clone(),
            shutdown: shutdown_rx,
            failures: 0,
        };

        self.status.transition(MonitorState::Streaming);
        self.collaborators.sink.emit(MonitorEvent::Started {
            subscription: self.subscription.clone(),
        });
        self.shutdown_tx = Some(shutdown_tx);
        self.worker = Some(tokio::spawn(worker.run(stream)));

        tracing::info!(subscription = %self.subscription, "Streaming started");
        Ok(())
    }

    async fn handshake(&self) -> Result<Box<dyn PullStream>> {
        self.collaborators
            .admin
            .validate_subscription(&self.subscription)
            .await?;
        self.collaborators
            .broker
            .open_stream(&self.subscription)
            .await
    }

    /// Stop the worker and release the session
    ///
    /// Idempotent. Waits up to the stop timeout for the worker to finish,
    /// then aborts it. No buffer writes happen after this returns.
    pub async fn stop(&mut self) -> Result<()> {
        if self.worker.is_none() && self.status.get().is_terminal() {
            return Ok(());
        }

        self.status.transition(MonitorState::Stopping);
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }

        let result = match self.worker.take() {
            Some(worker) => self.drain(worker).await,
            None => Ok(()),
        };

        if self.status.transition(MonitorState::Stopped) {
            self.collaborators.sink.emit(MonitorEvent::Stopped {
                subscription: self.subscription.clone(),
            });
            tracing::info!(subscription = %self.subscription, "Streaming stopped");
        }
        result
    }

    async fn drain(&self, mut worker: JoinHandle<()>) -> Result<()> {
        match tokio::time::timeout(self.settings.stop_timeout, &mut worker).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_panic() => Err(Error::Fatal(format!(
                "worker for {} panicked",
                self.subscription
            ))),
            Ok(Err(_)) => Ok(()),
            Err(_) => {
                tracing::warn!(
                    subscription = %self.subscription,
                    timeout_ms = self.settings.stop_timeout.as_millis() as u64,
                    "Worker did not drain in time, aborting"
                );
                worker.abort();
                // Wait for the abort to land so nothing writes to the buffer afterwards
                let _ = worker.await;
                Ok(())
            }
        }
    }
}

impl Drop for MessageStreamer {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}
