//! Monitor registry
//!
//! The registry maps each subscription to its running monitor and is the
//! only place monitors are created or destroyed.
//!
//! # Architecture
//!
//! ```text
//!                        MonitorRegistry
//!                 ┌────────────────────────────┐
//!                 │ RwLock<                    │
//!                 │   by_subscription: HashMap<│
//!                 │     SubscriptionId,        │
//!                 │     MonitorEntry {         │
//!                 │       streamer, buffer,    │
//!                 │       status, reaper }>,   │
//!                 │   topic_links: HashMap<    │
//!                 │     TopicId, Link>>        │
//!                 └─────────────┬──────────────┘
//!                               │
//!         ┌─────────────────────┼─────────────────────┐
//!         ▼                     ▼                     ▼
//!   [MessageStreamer]     [MessageStreamer]     [MessageStreamer]
//!    worker task           worker task           worker task
//!         │                     │                     │
//!         ▼                     ▼                     ▼
//!   MessageBuffer          MessageBuffer         MessageBuffer
//!   (own lock)             (own lock)            (own lock)
//! ```
//!
//! A topic monitor is an ordinary monitor on a disposable subscription the
//! registry creates for the topic and deletes when the monitor is stopped.

pub mod config;
pub mod entry;
pub mod store;

pub use config::MonitorConfig;
pub use entry::{MonitorHandle, TopicMonitorLink};
pub use store::MonitorRegistry;
