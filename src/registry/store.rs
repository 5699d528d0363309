//! Monitor registry implementation
//!
//! The central registry that owns every running monitor and enforces one
//! active monitor per subscription.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};

use super::config::MonitorConfig;
use super::entry::{MonitorEntry, MonitorHandle, TopicMonitorLink};
use crate::ack::{AckPolicy, Acknowledger};
use crate::buffer::MessageBuffer;
use crate::client::Collaborators;
use crate::error::{Error, Result};
use crate::message::ReceivedMessage;
use crate::resource::{SubscriptionId, TopicId, MAX_NAME_LEN};
use crate::stats::StatsSnapshot;
use crate::streamer::{MessageStreamer, MonitorState};

/// Everything guarded by the registry lock
#[derive(Default)]
struct Monitors {
    by_subscription: HashMap<SubscriptionId, Arc<MonitorEntry>>,
    topic_links: HashMap<TopicId, TopicMonitorLink>,
    closed: bool,
}

impl Monitors {
    fn active(&self, subscription: &SubscriptionId) -> Option<&Arc<MonitorEntry>> {
        self.by_subscription
            .get(subscription)
            .filter(|entry| entry.handle.is_active())
    }

    /// Remove the link of `topic` if it still points at `subscription`
    fn take_link(
        &mut self,
        topic: &TopicId,
        subscription: &SubscriptionId,
    ) -> Option<TopicMonitorLink> {
        let owned = self
            .topic_links
            .get(topic)
            .is_some_and(|link| &link.subscription == subscription);
        if owned {
            self.topic_links.remove(topic)
        } else {
            None
        }
    }
}

/// Central registry for all monitors
///
/// One `RwLock` guards the subscription map and the topic links; it is held
/// only while the maps change, never across a broker round trip. Each
/// monitor's buffer has its own lock.
pub struct MonitorRegistry {
    monitors: Arc<RwLock<Monitors>>,

    /// Serializes topic monitor start/stop
    topic_ops: Mutex<()>,

    collaborators: Collaborators,

    ack_policy: AckPolicy,

    config: MonitorConfig,

    next_generation: AtomicU64,
}

impl MonitorRegistry {
    /// Create a registry with default configuration
    pub fn new(collaborators: Collaborators) -> Self {
        Self::with_config(collaborators, MonitorConfig::default())
    }

    /// Create a registry with custom configuration
    pub fn with_config(collaborators: Collaborators, config: MonitorConfig) -> Self {
        Self {
            monitors: Arc::new(RwLock::new(Monitors::default())),
            topic_ops: Mutex::new(()),
            collaborators,
            ack_policy: AckPolicy::new(config.auto_ack),
            config,
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Start monitoring a subscription
    ///
    /// If the subscription already has a running monitor, its handle is
    /// returned and nothing new is started. A call that arrives during
    /// another call's handshake waits for it to finish. Handshake failures
    /// are returned here and leave no entry behind.
    pub async fn start_monitor(&self, subscription: &SubscriptionId) -> Result<MonitorHandle> {
        self.start_monitor_for(subscription, None).await
    }

    async fn start_monitor_for(
        &self,
        subscription: &SubscriptionId,
        topic: Option<TopicId>,
    ) -> Result<MonitorHandle> {
        let entry = loop {
            let pending = {
                let mut monitors = self.monitors.write().await;
                if monitors.closed {
                    return Err(Error::Closed);
                }
                match monitors.active(subscription) {
                    Some(existing) => existing.handle.clone(),
                    None => {
                        // Registered before the handshake so concurrent starts see it
                        let entry = Arc::new(self.create_entry(subscription, topic.clone()));
                        monitors
                            .by_subscription
                            .insert(subscription.clone(), Arc::clone(&entry));
                        break entry;
                    }
                }
            };

            let state = pending
                .wait_for_state(|s| !matches!(s, MonitorState::Idle | MonitorState::Starting))
                .await;
            if state.is_active() {
                tracing::debug!(subscription = %subscription, "Monitor already running");
                return Ok(pending);
            }
            // The in-flight handshake failed; run our own so the caller sees why
        };

        match entry.start(|| self.spawn_reaper(&entry)).await {
            Ok(()) => {
                tracing::info!(
                    subscription = %subscription,
                    generation = entry.generation,
                    "Monitor started"
                );
                Ok(entry.handle.clone())
            }
            Err(e) => {
                remove_if_current(&self.monitors, subscription, entry.generation).await;
                tracing::warn!(subscription = %subscription, error = %e, "Monitor failed to start");
                Err(e)
            }
        }
    }

    fn create_entry(&self, subscription: &SubscriptionId, topic: Option<TopicId>) -> MonitorEntry {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let buffer = Arc::new(MessageBuffer::new(self.config.capacity()));
        let streamer = MessageStreamer::new(
            subscription.clone(),
            buffer,
            Acknowledger::new(self.ack_policy.clone()),
            self.collaborators.clone(),
            self.config.streamer_settings(),
        );
        MonitorEntry::new(generation, topic, streamer)
    }

    /// Spawn the task that removes `entry` once its monitor fails
    ///
    /// For topic monitors it also drops the link and deletes the temporary
    /// subscription.
    fn spawn_reaper(&self, entry: &MonitorEntry) -> JoinHandle<()> {
        let mut state_rx = entry.handle.watch_state();
        let monitors = Arc::downgrade(&self.monitors);
        let admin = Arc::clone(&self.collaborators.admin);
        let subscription = entry.handle.subscription().clone();
        let topic = entry.handle.topic().cloned();
        let generation = entry.generation;

        tokio::spawn(async move {
            let failed = match state_rx.wait_for(|s| s.is_terminal()).await {
                Ok(state) => *state == MonitorState::Failed,
                Err(_) => false,
            };
            if !failed {
                return;
            }

            let Some(monitors) = Weak::upgrade(&monitors) else {
                return;
            };
            if !remove_if_current(&monitors, &subscription, generation).await {
                return;
            }
            tracing::info!(subscription = %subscription, "Failed monitor removed");

            let Some(topic) = topic else {
                return;
            };
            let link = monitors.write().await.take_link(&topic, &subscription);
            if let Some(link) = link {
                if let Err(e) = admin.delete_subscription(&link.subscription).await {
                    tracing::warn!(
                        topic = %link.topic,
                        subscription = %link.subscription,
                        error = %e,
                        "Failed to delete temporary subscription"
                    );
                }
            }
        })
    }

    /// Stop monitoring a subscription
    ///
    /// A no-op if nothing is monitoring it. The entry is removed even if the
    /// worker has to be aborted. Stopping the temporary subscription of a
    /// topic monitor also unlinks and deletes it, like
    /// [`stop_topic_monitor`](Self::stop_topic_monitor).
    pub async fn stop_monitor(&self, subscription: &SubscriptionId) -> Result<()> {
        let (entry, link) = {
            let mut monitors = self.monitors.write().await;
            let Some(entry) = monitors.by_subscription.remove(subscription) else {
                tracing::debug!(subscription = %subscription, "No monitor to stop");
                return Ok(());
            };
            let link = match entry.handle.topic() {
                Some(topic) => monitors.take_link(topic, subscription),
                None => None,
            };
            (entry, link)
        };

        let stopped = entry.stop().await;
        tracing::info!(subscription = %subscription, "Monitor stopped");

        match link {
            Some(link) => stopped.and(self.delete_temporary(&link).await),
            None => stopped,
        }
    }

    /// Monitor a topic through a disposable subscription
    ///
    /// Creates the subscription, links it to the topic, then starts a
    /// monitor on it. If the topic is already monitored, the existing handle
    /// is returned.
    pub async fn start_topic_monitor(&self, topic: &TopicId) -> Result<MonitorHandle> {
        let _ops = self.topic_ops.lock().await;

        let stale = {
            let mut monitors = self.monitors.write().await;
            if monitors.closed {
                return Err(Error::Closed);
            }
            if let Some(link) = monitors.topic_links.get(topic) {
                if let Some(entry) = monitors.active(&link.subscription) {
                    return Ok(entry.handle.clone());
                }
            }
            monitors.topic_links.remove(topic)
        };

        // Link left behind by a monitor stopped directly
        if let Some(stale) = stale {
            let _ = self.stop_monitor(&stale.subscription).await;
            let _ = self.delete_temporary(&stale).await;
        }

        let name = self.temp_subscription_name(topic)?;
        let subscription = self
            .collaborators
            .admin
            .create_subscription(topic, &name)
            .await?;
        tracing::info!(topic = %topic, subscription = %subscription, "Temporary subscription created");

        let link = TopicMonitorLink {
            topic: topic.clone(),
            subscription: subscription.clone(),
        };
        self.monitors
            .write()
            .await
            .topic_links
            .insert(topic.clone(), link.clone());

        match self.start_monitor_for(&subscription, Some(topic.clone())).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.monitors.write().await.topic_links.remove(topic);
                let _ = self.delete_temporary(&link).await;
                Err(e)
            }
        }
    }

    /// Stop a topic monitor and delete its temporary subscription
    ///
    /// The monitor is always removed. A failure to delete the subscription
    /// is returned after teardown has completed.
    pub async fn stop_topic_monitor(&self, topic: &TopicId) -> Result<()> {
        let _ops = self.topic_ops.lock().await;

        let link = self.monitors.write().await.topic_links.remove(topic);
        let Some(link) = link else {
            tracing::debug!(topic = %topic, "No topic monitor to stop");
            return Ok(());
        };

        let stopped = self.stop_monitor(&link.subscription).await;
        let deleted = self.delete_temporary(&link).await;
        stopped.and(deleted)
    }

    async fn delete_temporary(&self, link: &TopicMonitorLink) -> Result<()> {
        match self
            .collaborators
            .admin
            .delete_subscription(&link.subscription)
            .await
        {
            Ok(()) => {
                tracing::info!(
                    topic = %link.topic,
                    subscription = %link.subscription,
                    "Temporary subscription deleted"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    topic = %link.topic,
                    subscription = %link.subscription,
                    error = %e,
                    "Failed to delete temporary subscription"
                );
                Err(e)
            }
        }
    }

    /// Unique name for a topic's disposable subscription
    fn temp_subscription_name(&self, topic: &TopicId) -> Result<SubscriptionId> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let seq = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let prefix = &self.config.temp_subscription_prefix;
        let suffix = format!("-{millis}-{seq}");
        let room = MAX_NAME_LEN.saturating_sub(prefix.len() + suffix.len());
        let topic_part: String = topic.name().chars().take(room).collect();

        SubscriptionId::sibling_of(topic, &format!("{prefix}{topic_part}{suffix}"))
    }

    /// Snapshot of a monitor's buffer, oldest first
    pub async fn get_buffered_messages(
        &self,
        subscription: &SubscriptionId,
    ) -> Option<Vec<Arc<ReceivedMessage>>> {
        let monitors = self.monitors.read().await;
        monitors
            .by_subscription
            .get(subscription)
            .map(|entry| entry.handle.messages())
    }

    /// Empty a monitor's buffer
    ///
    /// Returns false if the subscription is not monitored.
    pub async fn clear_buffer(&self, subscription: &SubscriptionId) -> bool {
        let monitors = self.monitors.read().await;
        match monitors.by_subscription.get(subscription) {
            Some(entry) => {
                entry.handle.clear();
                tracing::debug!(subscription = %subscription, "Buffer cleared");
                true
            }
            None => false,
        }
    }

    /// Change the auto-ack setting for every monitor
    ///
    /// Takes effect for the next message each monitor processes.
    pub fn set_auto_ack(&self, enabled: bool) {
        self.ack_policy.set_auto_ack(enabled);
    }

    pub fn auto_ack(&self) -> bool {
        self.ack_policy.auto_ack()
    }

    /// Handle for a monitored subscription
    pub async fn handle(&self, subscription: &SubscriptionId) -> Option<MonitorHandle> {
        let monitors = self.monitors.read().await;
        monitors
            .by_subscription
            .get(subscription)
            .map(|entry| entry.handle.clone())
    }

    pub async fn monitor_state(&self, subscription: &SubscriptionId) -> Option<MonitorState> {
        self.handle(subscription).await.map(|h| h.state())
    }

    pub async fn monitor_stats(&self, subscription: &SubscriptionId) -> Option<StatsSnapshot> {
        self.handle(subscription).await.map(|h| h.stats())
    }

    /// Monitored subscriptions, sorted
    pub async fn active_monitors(&self) -> Vec<SubscriptionId> {
        let monitors = self.monitors.read().await;
        let mut subscriptions: Vec<SubscriptionId> =
            monitors.by_subscription.keys().cloned().collect();
        subscriptions.sort();
        subscriptions
    }

    /// Get total number of monitors
    pub async fn monitor_count(&self) -> usize {
        self.monitors.read().await.by_subscription.len()
    }

    /// Temporary subscription backing a topic monitor
    pub async fn topic_subscription(&self, topic: &TopicId) -> Option<SubscriptionId> {
        let monitors = self.monitors.read().await;
        monitors
            .topic_links
            .get(topic)
            .map(|link| link.subscription.clone())
    }

    pub async fn is_closed(&self) -> bool {
        self.monitors.read().await.closed
    }

    /// Stop every monitor and close the registry
    ///
    /// Monitors are stopped concurrently; a failure to stop one does not
    /// prevent stopping the others. Temporary subscriptions are deleted on a
    /// best-effort basis. Later starts fail with [`Error::Closed`].
    pub async fn shutdown(&self) {
        let _ops = self.topic_ops.lock().await;

        let (entries, links) = {
            let mut monitors = self.monitors.write().await;
            monitors.closed = true;
            let entries: Vec<Arc<MonitorEntry>> =
                monitors.by_subscription.drain().map(|(_, e)| e).collect();
            let links: Vec<TopicMonitorLink> =
                monitors.topic_links.drain().map(|(_, l)| l).collect();
            (entries, links)
        };

        tracing::info!(
            monitors = entries.len(),
            topic_monitors = links.len(),
            "Shutting down monitor registry"
        );

        let mut stops = JoinSet::new();
        for entry in entries {
            stops.spawn(async move {
                let subscription = entry.handle.subscription().clone();
                (subscription, entry.stop().await)
            });
        }

        let mut failures = 0usize;
        while let Some(joined) = stops.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((subscription, Err(e))) => {
                    failures += 1;
                    tracing::warn!(subscription = %subscription, error = %e, "Monitor stop failed");
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, "Monitor stop task failed");
                }
            }
        }

        for link in links {
            let _ = self.delete_temporary(&link).await;
        }

        tracing::info!(failures = failures, "Monitor registry shut down");
    }
}

/// Remove the entry for `subscription` if it is still `generation`
///
/// Returns whether an entry was removed.
async fn remove_if_current(
    monitors: &RwLock<Monitors>,
    subscription: &SubscriptionId,
    generation: u64,
) -> bool {
    let mut monitors = monitors.write().await;
    let current = monitors
        .by_subscription
        .get(subscription)
        .is_some_and(|entry| entry.generation == generation);
    if current {
        monitors.by_subscription.remove(subscription);
    }
    current
}
