//! End-to-end monitor lifecycle against the in-process broker

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

use pubsub_monitor::client::{Collaborators, InMemoryBroker};
use pubsub_monitor::events::ChannelSink;
use pubsub_monitor::streamer::ReconnectPolicy;
use pubsub_monitor::{
    Error, MonitorConfig, MonitorEvent, MonitorRegistry, MonitorState, SubscriptionId, TopicId,
};

struct Harness {
    broker: InMemoryBroker,
    topic: TopicId,
    sub: SubscriptionId,
    events: mpsc::Receiver<MonitorEvent>,
    registry: MonitorRegistry,
}

fn harness(capacity: usize) -> Harness {
    let broker = InMemoryBroker::new();
    let topic = TopicId::new("projects/acme/topics/orders").unwrap();
    let sub = SubscriptionId::new("projects/acme/subscriptions/orders-sub").unwrap();
    broker.create_topic(&topic);
    broker.add_subscription(&topic, &sub).unwrap();

    let (sink, events) = ChannelSink::new(1024);
    let config = MonitorConfig::default()
        .buffer_capacity(capacity)
        .stop_timeout(Duration::from_millis(500))
        .reconnect(
            ReconnectPolicy::default()
                .base_delay(Duration::from_millis(5))
                .max_attempts(3),
        );
    let registry =
        MonitorRegistry::with_config(Collaborators::in_memory(&broker, Arc::new(sink)), config);

    Harness {
        broker,
        topic,
        sub,
        events,
        registry,
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

fn drain(events: &mut mpsc::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn buffer_keeps_most_recent_messages() {
    let h = harness(3);
    let handle = assert_ok!(h.registry.start_monitor(&h.sub).await);

    for payload in ["A", "B", "C", "D"] {
        h.broker.publish(&h.topic, payload).unwrap();
    }
    eventually(|| handle.stats().received == 4).await;

    let texts: Vec<String> = handle
        .messages()
        .iter()
        .map(|m| m.text().unwrap().to_string())
        .collect();
    assert_eq!(texts, vec!["B", "C", "D"]);
    assert_eq!(handle.stats().evicted, 1);

    h.registry.shutdown().await;
}

#[tokio::test]
async fn second_start_returns_existing_monitor() {
    let h = harness(10);

    let first = assert_ok!(h.registry.start_monitor(&h.sub).await);
    let second = assert_ok!(h.registry.start_monitor(&h.sub).await);

    assert!(first.same_monitor(&second));
    assert_eq!(h.broker.open_count(&h.sub), 1);
    assert_eq!(h.registry.active_monitors().await, vec![h.sub.clone()]);

    h.registry.shutdown().await;
}

#[tokio::test]
async fn stopping_unknown_monitor_is_noop() {
    let mut h = harness(10);

    assert_ok!(h.registry.stop_monitor(&h.sub).await);
    assert_ok!(h.registry.stop_topic_monitor(&h.topic).await);
    assert!(drain(&mut h.events).is_empty());
}

#[tokio::test]
async fn stop_emits_lifecycle_events_in_order() {
    let mut h = harness(10);
    let handle = assert_ok!(h.registry.start_monitor(&h.sub).await);

    h.broker.publish(&h.topic, "hello").unwrap();
    eventually(|| handle.stats().received == 1).await;
    assert_ok!(h.registry.stop_monitor(&h.sub).await);

    let events = drain(&mut h.events);
    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], MonitorEvent::Started { .. }));
    assert!(matches!(events[1], MonitorEvent::MessageReceived { .. }));
    assert!(matches!(events[2], MonitorEvent::Stopped { .. }));
    assert!(events.iter().all(|e| e.subscription() == &h.sub));

    assert_eq!(handle.state(), MonitorState::Stopped);
    assert!(h.registry.handle(&h.sub).await.is_none());
}

#[tokio::test]
async fn shutdown_stops_everything() {
    let h = harness(10);
    let other = SubscriptionId::new("projects/acme/subscriptions/orders-audit").unwrap();
    h.broker.add_subscription(&h.topic, &other).unwrap();

    let first = assert_ok!(h.registry.start_monitor(&h.sub).await);
    let second = assert_ok!(h.registry.start_monitor(&other).await);
    let topic_handle = assert_ok!(h.registry.start_topic_monitor(&h.topic).await);
    let temp = topic_handle.subscription().clone();

    h.registry.shutdown().await;

    assert_eq!(h.registry.monitor_count().await, 0);
    for handle in [&first, &second, &topic_handle] {
        assert_eq!(handle.state(), MonitorState::Stopped);
    }
    assert_eq!(h.broker.deleted_subscriptions(), vec![temp]);

    h.broker.publish(&h.topic, "late").unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(first.messages().is_empty());
    assert!(second.messages().is_empty());

    assert_eq!(
        assert_err!(h.registry.start_monitor(&h.sub).await),
        Error::Closed
    );
}

#[tokio::test]
async fn auto_ack_toggle_applies_to_next_message() {
    let h = harness(10);
    let handle = assert_ok!(h.registry.start_monitor(&h.sub).await);

    h.broker.publish(&h.topic, "acked").unwrap();
    eventually(|| handle.stats().acked == 1).await;

    h.registry.set_auto_ack(false);
    h.broker.publish(&h.topic, "kept").unwrap();
    eventually(|| handle.stats().left_unacked == 1).await;

    assert_eq!(h.broker.acked(&h.sub).len(), 1);
    assert_eq!(handle.messages().len(), 2);

    h.registry.set_auto_ack(true);
    h.broker.publish(&h.topic, "acked again").unwrap();
    eventually(|| handle.stats().acked == 2).await;

    h.registry.shutdown().await;
}

#[tokio::test]
async fn topic_monitor_owns_one_temporary_subscription() {
    let h = harness(10);

    let handle = assert_ok!(h.registry.start_topic_monitor(&h.topic).await);
    let again = assert_ok!(h.registry.start_topic_monitor(&h.topic).await);
    assert!(handle.same_monitor(&again));

    let created = h.broker.created_subscriptions();
    assert_eq!(created.len(), 1);
    let temp = &created[0];
    assert_eq!(handle.subscription(), temp);
    assert_eq!(handle.topic(), Some(&h.topic));
    assert_eq!(temp.project(), Some("acme"));
    assert!(temp.name().starts_with("monitor-orders-"));
    assert_eq!(h.registry.topic_subscription(&h.topic).await.as_ref(), Some(temp));

    h.broker.publish(&h.topic, "seen").unwrap();
    eventually(|| handle.stats().received == 1).await;

    assert_ok!(h.registry.stop_topic_monitor(&h.topic).await);
    assert_eq!(h.broker.deleted_subscriptions(), vec![temp.clone()]);
    assert!(!h.broker.subscription_exists(temp));
    assert!(h.registry.topic_subscription(&h.topic).await.is_none());
    assert_eq!(h.registry.monitor_count().await, 0);
}

#[tokio::test]
async fn topic_monitor_stops_even_when_delete_fails() {
    let h = harness(10);
    let handle = assert_ok!(h.registry.start_topic_monitor(&h.topic).await);
    let temp = handle.subscription().clone();

    h.broker.fail_deletes(true);
    let err = assert_err!(h.registry.stop_topic_monitor(&h.topic).await);
    assert!(err.is_transient());

    assert_eq!(h.broker.delete_attempts(), vec![temp]);
    assert_eq!(handle.state(), MonitorState::Stopped);
    assert_eq!(h.registry.monitor_count().await, 0);
    assert!(h.registry.topic_subscription(&h.topic).await.is_none());
}

#[tokio::test]
async fn topic_monitor_on_missing_topic() {
    let h = harness(10);
    let missing = TopicId::new("projects/acme/topics/missing").unwrap();

    let err = assert_err!(h.registry.start_topic_monitor(&missing).await);
    assert!(matches!(err, Error::NotFound(_)));
    assert!(h.broker.created_subscriptions().is_empty());
    assert_eq!(h.registry.monitor_count().await, 0);
}

#[tokio::test]
async fn failed_topic_monitor_deletes_its_subscription() {
    let h = harness(10);
    let handle = assert_ok!(h.registry.start_topic_monitor(&h.topic).await);
    let temp = handle.subscription().clone();

    h.broker
        .fail_pull(&temp, Error::PermissionDenied("revoked".into()))
        .unwrap();
    assert_eq!(
        handle.wait_for_state(|s| s.is_terminal()).await,
        MonitorState::Failed
    );

    let broker = h.broker.clone();
    eventually(|| broker.deleted_subscriptions() == vec![temp.clone()]).await;

    let registry = &h.registry;
    tokio::time::timeout(Duration::from_secs(2), async {
        while registry.topic_subscription(&h.topic).await.is_some() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(registry.monitor_count().await, 0);
}

#[tokio::test]
async fn missing_subscription_leaves_no_entry() {
    let mut h = harness(10);
    let missing = SubscriptionId::new("projects/acme/subscriptions/missing").unwrap();

    let err = assert_err!(h.registry.start_monitor(&missing).await);
    assert!(matches!(err, Error::NotFound(_)));
    assert!(h.registry.handle(&missing).await.is_none());
    assert!(h.registry.get_buffered_messages(&missing).await.is_none());
    assert!(drain(&mut h.events).is_empty());
}

#[tokio::test]
async fn transient_error_reconnects_to_streaming() {
    let mut h = harness(10);
    let handle = assert_ok!(h.registry.start_monitor(&h.sub).await);

    h.broker
        .fail_pull(&h.sub, Error::Transient("connection reset".into()))
        .unwrap();
    h.broker.publish(&h.topic, "after reconnect").unwrap();
    eventually(|| handle.stats().received == 1).await;

    assert_eq!(handle.state(), MonitorState::Streaming);
    assert_eq!(handle.stats().reconnects, 1);
    assert_eq!(h.broker.open_count(&h.sub), 2);

    let errors: Vec<_> = drain(&mut h.events)
        .into_iter()
        .filter_map(|e| match e {
            MonitorEvent::Error { terminal, .. } => Some(terminal),
            _ => None,
        })
        .collect();
    assert_eq!(errors, vec![false]);

    h.registry.shutdown().await;
}

#[tokio::test]
async fn fatal_error_removes_monitor() {
    let h = harness(10);
    let handle = assert_ok!(h.registry.start_monitor(&h.sub).await);

    h.broker
        .fail_pull(&h.sub, Error::PermissionDenied("revoked".into()))
        .unwrap();
    assert_eq!(
        handle.wait_for_state(|s| s.is_terminal()).await,
        MonitorState::Failed
    );

    let registry = &h.registry;
    tokio::time::timeout(Duration::from_secs(2), async {
        while registry.monitor_count().await != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    // A fresh start after the failure gets a new monitor
    let restarted = assert_ok!(h.registry.start_monitor(&h.sub).await);
    assert!(!restarted.same_monitor(&handle));
    assert_eq!(restarted.state(), MonitorState::Streaming);
    h.registry.shutdown().await;
}

#[tokio::test]
async fn undecodable_message_is_skipped() {
    let mut h = harness(10);
    let handle = assert_ok!(h.registry.start_monitor(&h.sub).await);

    h.broker
        .deliver_raw(&h.sub, pubsub_monitor::message::RawMessage::default())
        .unwrap();
    h.broker.publish(&h.topic, "valid").unwrap();
    eventually(|| handle.stats().received == 1).await;

    assert_eq!(handle.stats().decode_failures, 1);
    assert_eq!(handle.state(), MonitorState::Streaming);
    assert!(drain(&mut h.events).iter().any(|e| matches!(
        e,
        MonitorEvent::Error {
            error: Error::Decode(_),
            terminal: false,
            ..
        }
    )));

    h.registry.shutdown().await;
}
