//! In-process broker
//!
//! [`InMemoryBroker`] models topics, subscriptions and streaming pull inside
//! the current process. Publishing to a topic fans out to every subscription
//! attached to it. Faults can be injected per subscription, which makes it
//! the broker used by the test suite and the demo.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{BrokerClient, PullStream, ResourceAdmin};
use crate::error::{Error, Result};
use crate::message::{AckId, RawMessage};
use crate::resource::{SubscriptionId, TopicId};

/// Item waiting to be pulled from a subscription
#[derive(Debug)]
enum Delivery {
    Message(RawMessage),
    Fail(Error),
    Close,
}

/// Pending deliveries for one subscription
#[derive(Debug, Default)]
struct DeliveryQueue {
    items: Mutex<VecDeque<Delivery>>,
    notify: Notify,
    deleted: AtomicBool,
}

impl DeliveryQueue {
    fn push(&self, delivery: Delivery) {
        self.items.lock().push_back(delivery);
        self.notify.notify_one();
    }

    fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

#[derive(Debug)]
struct SubscriptionState {
    topic: Option<TopicId>,
    queue: Arc<DeliveryQueue>,
    acked: Vec<AckId>,
    opens: usize,
    open_failures: VecDeque<Error>,
}

impl SubscriptionState {
    fn new(topic: Option<TopicId>) -> Self {
        Self {
            topic,
            queue: Arc::new(DeliveryQueue::default()),
            acked: Vec::new(),
            opens: 0,
            open_failures: VecDeque::new(),
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashSet<TopicId>,
    subscriptions: HashMap<SubscriptionId, SubscriptionState>,
    denied: HashSet<SubscriptionId>,
    fail_deletes: bool,
    created: Vec<SubscriptionId>,
    delete_attempts: Vec<SubscriptionId>,
    deleted: Vec<SubscriptionId>,
    next_message_id: u64,
}

impl BrokerState {
    fn subscription_mut(&mut self, subscription: &SubscriptionId) -> Result<&mut SubscriptionState> {
        self.subscriptions
            .get_mut(subscription)
            .ok_or_else(|| Error::NotFound(format!("subscription {subscription}")))
    }

    fn check_access(&self, subscription: &SubscriptionId) -> Result<()> {
        if self.denied.contains(subscription) {
            return Err(Error::PermissionDenied(format!("subscription {subscription}")));
        }
        if !self.subscriptions.contains_key(subscription) {
            return Err(Error::NotFound(format!("subscription {subscription}")));
        }
        Ok(())
    }
}

/// Broker and resource administration in one in-process object
///
/// Cloning is cheap; clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a topic (no-op if it exists)
    pub fn create_topic(&self, topic: &TopicId) {
        self.state.lock().topics.insert(topic.clone());
    }

    /// Create a subscription attached to `topic`
    pub fn add_subscription(&self, topic: &TopicId, subscription: &SubscriptionId) -> Result<()> {
        let mut state = self.state.lock();
        if !state.topics.contains(topic) {
            return Err(Error::NotFound(format!("topic {topic}")));
        }
        state
            .subscriptions
            .entry(subscription.clone())
            .or_insert_with(|| SubscriptionState::new(Some(topic.clone())));
        Ok(())
    }

    /// Publish `data` to every subscription of `topic`
    ///
    /// Returns the message ID.
    pub fn publish(&self, topic: &TopicId, data: impl Into<Bytes>) -> Result<String> {
        self.publish_with_attributes(topic, data, HashMap::new())
    }

    /// Publish `data` with attributes to every subscription of `topic`
    pub fn publish_with_attributes(
        &self,
        topic: &TopicId,
        data: impl Into<Bytes>,
        attributes: HashMap<String, String>,
    ) -> Result<String> {
        let data = data.into();
        let mut state = self.state.lock();
        if !state.topics.contains(topic) {
            return Err(Error::NotFound(format!("topic {topic}")));
        }

        state.next_message_id += 1;
        let message_id = state.next_message_id.to_string();
        let publish_time = SystemTime::now();

        for (subscription, sub_state) in state.subscriptions.iter() {
            if sub_state.topic.as_ref() != Some(topic) {
                continue;
            }
            sub_state.queue.push(Delivery::Message(RawMessage {
                ack_id: format!("{subscription}#{message_id}"),
                message_id: message_id.clone(),
                data: data.clone(),
                attributes: attributes.clone(),
                publish_time: Some(publish_time),
                delivery_attempt: 0,
                ordering_key: String::new(),
            }));
        }

        Ok(message_id)
    }

    /// Deliver a raw message directly to one subscription
    pub fn deliver_raw(&self, subscription: &SubscriptionId, raw: RawMessage) -> Result<()> {
        let mut state = self.state.lock();
        state.subscription_mut(subscription)?.queue.push(Delivery::Message(raw));
        Ok(())
    }

    /// Make the next pull on `subscription` fail with `error`
    ///
    /// The failure is queued behind already pending messages.
    pub fn fail_pull(&self, subscription: &SubscriptionId, error: Error) -> Result<()> {
        let mut state = self.state.lock();
        state.subscription_mut(subscription)?.queue.push(Delivery::Fail(error));
        Ok(())
    }

    /// Close the current stream on `subscription` from the server side
    pub fn close_stream(&self, subscription: &SubscriptionId) -> Result<()> {
        let mut state = self.state.lock();
        state.subscription_mut(subscription)?.queue.push(Delivery::Close);
        Ok(())
    }

    /// Make the next `open_stream` on `subscription` fail with `error`
    pub fn fail_next_open(&self, subscription: &SubscriptionId, error: Error) -> Result<()> {
        let mut state = self.state.lock();
        state.subscription_mut(subscription)?.open_failures.push_back(error);
        Ok(())
    }

    /// Deny access to `subscription`
    pub fn deny(&self, subscription: &SubscriptionId) {
        self.state.lock().denied.insert(subscription.clone());
    }

    /// Make every subsequent delete fail
    pub fn fail_deletes(&self, fail: bool) {
        self.state.lock().fail_deletes = fail;
    }

    /// Delivery tokens acknowledged on `subscription`
    pub fn acked(&self, subscription: &SubscriptionId) -> Vec<AckId> {
        self.state
            .lock()
            .subscriptions
            .get(subscription)
            .map(|s| s.acked.clone())
            .unwrap_or_default()
    }

    /// Number of successful `open_stream` calls on `subscription`
    pub fn open_count(&self, subscription: &SubscriptionId) -> usize {
        self.state
            .lock()
            .subscriptions
            .get(subscription)
            .map(|s| s.opens)
            .unwrap_or(0)
    }

    /// Deliveries not yet pulled from `subscription`
    pub fn pending(&self, subscription: &SubscriptionId) -> usize {
        self.state
            .lock()
            .subscriptions
            .get(subscription)
            .map(|s| s.queue.items.lock().len())
            .unwrap_or(0)
    }

    pub fn subscription_exists(&self, subscription: &SubscriptionId) -> bool {
        self.state.lock().subscriptions.contains_key(subscription)
    }

    /// Subscriptions created through [`ResourceAdmin::create_subscription`]
    pub fn created_subscriptions(&self) -> Vec<SubscriptionId> {
        self.state.lock().created.clone()
    }

    /// Every delete requested, successful or not
    pub fn delete_attempts(&self) -> Vec<SubscriptionId> {
        self.state.lock().delete_attempts.clone()
    }

    /// Subscriptions actually deleted
    pub fn deleted_subscriptions(&self) -> Vec<SubscriptionId> {
        self.state.lock().deleted.clone()
    }
}

#[async_trait]
impl ResourceAdmin for InMemoryBroker {
    async fn validate_subscription(&self, subscription: &SubscriptionId) -> Result<()> {
        self.state.lock().check_access(subscription)
    }

    async fn create_subscription(
        &self,
        topic: &TopicId,
        name: &SubscriptionId,
    ) -> Result<SubscriptionId> {
        let mut state = self.state.lock();
        if !state.topics.contains(topic) {
            return Err(Error::NotFound(format!("topic {topic}")));
        }
        if state.subscriptions.contains_key(name) {
            return Err(Error::validation(name.as_str(), "subscription already exists"));
        }

        state
            .subscriptions
            .insert(name.clone(), SubscriptionState::new(Some(topic.clone())));
        state.created.push(name.clone());
        Ok(name.clone())
    }

    async fn delete_subscription(&self, subscription: &SubscriptionId) -> Result<()> {
        let mut state = self.state.lock();
        state.delete_attempts.push(subscription.clone());

        if state.fail_deletes {
            return Err(Error::Transient(format!("delete {subscription} timed out")));
        }
        let removed = state
            .subscriptions
            .remove(subscription)
            .ok_or_else(|| Error::NotFound(format!("subscription {subscription}")))?;

        removed.queue.mark_deleted();
        state.deleted.push(subscription.clone());
        Ok(())
    }
}

#[async_trait]
impl BrokerClient for InMemoryBroker {
    async fn open_stream(&self, subscription: &SubscriptionId) -> Result<Box<dyn PullStream>> {
        let mut state = self.state.lock();
        state.check_access(subscription)?;

        let sub_state = state.subscription_mut(subscription)?;
        if let Some(error) = sub_state.open_failures.pop_front() {
            return Err(error);
        }
        sub_state.opens += 1;

        Ok(Box::new(MemoryStream {
            subscription: subscription.clone(),
            queue: Arc::clone(&sub_state.queue),
            state: Arc::clone(&self.state),
        }))
    }
}

/// Streaming session over an in-memory subscription
struct MemoryStream {
    subscription: SubscriptionId,
    queue: Arc<DeliveryQueue>,
    state: Arc<Mutex<BrokerState>>,
}

#[async_trait]
impl PullStream for MemoryStream {
    async fn next(&mut self) -> Result<Option<RawMessage>> {
        loop {
            let notified = self.queue.notify.notified();

            if self.queue.deleted.load(Ordering::Acquire) {
                return Err(Error::NotFound(format!("subscription {}", self.subscription)));
            }
            let delivery = self.queue.items.lock().pop_front();
            match delivery {
                Some(Delivery::Message(raw)) => return Ok(Some(raw)),
                Some(Delivery::Fail(error)) => return Err(error),
                Some(Delivery::Close) => return Ok(None),
                None => notified.await,
            }
        }
    }

    async fn ack(&mut self, ack_id: &AckId) -> Result<()> {
        let mut state = self.state.lock();
        let sub_state = state.subscription_mut(&self.subscription)?;
        sub_state.acked.push(ack_id.clone());
        Ok(())
    }
}
