//! Live subscription monitoring for a managed pub/sub broker
//!
//! This crate is the streaming core of a broker management console. It
//! opens a streaming-pull session per monitored subscription, keeps the most
//! recent messages in a bounded buffer, acknowledges them according to a
//! runtime-switchable policy, and reports what happens through an event
//! sink.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use pubsub_monitor::client::{Collaborators, InMemoryBroker};
//! use pubsub_monitor::events::ChannelSink;
//! use pubsub_monitor::{MonitorRegistry, TopicId};
//!
//! # async fn example() -> pubsub_monitor::Result<()> {
//! let broker = InMemoryBroker::new();
//! let topic = TopicId::new("orders")?;
//! broker.create_topic(&topic);
//!
//! let (sink, mut events) = ChannelSink::new(256);
//! let registry = MonitorRegistry::new(Collaborators::in_memory(&broker, Arc::new(sink)));
//!
//! let monitor = registry.start_topic_monitor(&topic).await?;
//! broker.publish(&topic, "hello")?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # registry.shutdown().await;
//! # drop(monitor);
//! # Ok(())
//! # }
//! ```

pub mod ack;
pub mod buffer;
pub mod client;
pub mod error;
pub mod events;
pub mod message;
pub mod registry;
pub mod resource;
pub mod stats;
pub mod streamer;

pub use ack::{AckDecision, AckPolicy, Acknowledger};
pub use buffer::MessageBuffer;
pub use error::{Error, Result};
pub use events::{EventSink, MonitorEvent};
pub use message::ReceivedMessage;
pub use registry::{MonitorConfig, MonitorHandle, MonitorRegistry};
pub use resource::{SubscriptionId, TopicId};
pub use streamer::{MessageStreamer, MonitorState};
