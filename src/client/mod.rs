//! Broker-facing ports
//!
//! The monitoring core never talks to the network itself. It drives:
//! - a [`ResourceAdmin`] to validate subscriptions and manage the disposable
//!   subscriptions used by topic monitors
//! - a [`BrokerClient`] to open streaming-pull sessions
//!
//! [`memory::InMemoryBroker`] implements both in-process.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::events::EventSink;
use crate::message::{AckId, RawMessage};
use crate::resource::{SubscriptionId, TopicId};

pub use memory::InMemoryBroker;

/// Everything outside the core that a monitor talks to
#[derive(Clone)]
pub struct Collaborators {
    pub broker: Arc<dyn BrokerClient>,
    pub admin: Arc<dyn ResourceAdmin>,
    pub sink: Arc<dyn EventSink>,
}

impl Collaborators {
    pub fn new(
        broker: Arc<dyn BrokerClient>,
        admin: Arc<dyn ResourceAdmin>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            broker,
            admin,
            sink,
        }
    }

    /// Use one in-memory broker for both streaming and administration
    pub fn in_memory(broker: &InMemoryBroker, sink: Arc<dyn EventSink>) -> Self {
        Self::new(Arc::new(broker.clone()), Arc::new(broker.clone()), sink)
    }
}

/// Resource administration used by the monitoring core
#[async_trait]
pub trait ResourceAdmin: Send + Sync + 'static {
    /// Check that `subscription` exists and is accessible
    ///
    /// Returns `NotFound` or `PermissionDenied` otherwise.
    async fn validate_subscription(&self, subscription: &SubscriptionId) -> Result<()>;

    /// Create a subscription named `name` attached to `topic`
    async fn create_subscription(
        &self,
        topic: &TopicId,
        name: &SubscriptionId,
    ) -> Result<SubscriptionId>;

    /// Delete a subscription
    async fn delete_subscription(&self, subscription: &SubscriptionId) -> Result<()>;
}

/// Opens streaming-pull sessions
#[async_trait]
pub trait BrokerClient: Send + Sync + 'static {
    /// Open a streaming session for `subscription`
    ///
    /// Fails with `NotFound`/`PermissionDenied` for permanent problems and
    /// `Transient` for retryable ones.
    async fn open_stream(&self, subscription: &SubscriptionId) -> Result<Box<dyn PullStream>>;
}

/// One live streaming-pull session
#[async_trait]
pub trait PullStream: Send {
    /// Wait for the next delivery
    ///
    /// `Ok(None)` means the server closed the stream.
    async fn next(&mut self) -> Result<Option<RawMessage>>;

    /// Acknowledge one delivery
    async fn ack(&mut self, ack_id: &AckId) -> Result<()>;
}
