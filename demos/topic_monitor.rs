//! Topic monitor demo - Watches a topic through a disposable subscription
//!
//! Run with: cargo run --example topic_monitor -- [MESSAGES]
//!
//! This example demonstrates:
//! - Starting a topic monitor, which creates and later deletes a temporary
//!   subscription
//! - Consuming monitor events through a `ChannelSink`
//! - Switching auto-ack off at runtime
//! - Reading the bounded message buffer
//!
//! ```text
//!   publisher ──> topic "orders" ──> monitor-orders-<ts>-<n>
//!                                          │
//!                                          ▼
//!                                   MessageStreamer ──> MessageBuffer
//!                                          │
//!                                          ▼
//!                                     ChannelSink ──> this program
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use pubsub_monitor::client::{Collaborators, InMemoryBroker};
use pubsub_monitor::events::ChannelSink;
use pubsub_monitor::{MonitorConfig, MonitorEvent, MonitorRegistry, TopicId};

fn print_usage() {
    eprintln!("Usage: topic_monitor [MESSAGES]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  MESSAGES    Number of messages to publish (default: 12)");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let count: usize = match args.get(1) {
        Some(arg) => match arg.parse() {
            Ok(n) => n,
            Err(_) => {
                eprintln!("Error: invalid message count '{}'", arg);
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => 12,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pubsub_monitor=debug".parse()?),
        )
        .init();

    let broker = InMemoryBroker::new();
    let topic = TopicId::new("projects/demo/topics/orders")?;
    broker.create_topic(&topic);

    let (sink, mut events) = ChannelSink::new(256);
    let config = MonitorConfig::default().buffer_capacity(5);
    let registry = MonitorRegistry::with_config(
        Collaborators::in_memory(&broker, Arc::new(sink)),
        config,
    );

    let monitor = registry.start_topic_monitor(&topic).await?;
    println!("Monitoring {} via {}", topic, monitor.subscription());

    // Print events as they arrive
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                MonitorEvent::Started { subscription } => {
                    println!("[{}] started", subscription);
                }
                MonitorEvent::MessageReceived {
                    subscription,
                    message,
                } => {
                    println!(
                        "[{}] message {} ({} bytes): {}",
                        subscription,
                        message.id,
                        message.size(),
                        message.text().unwrap_or("<binary>")
                    );
                }
                MonitorEvent::Error {
                    subscription,
                    error,
                    terminal,
                } => {
                    println!("[{}] error (terminal={}): {}", subscription, terminal, error);
                }
                MonitorEvent::Stopped { subscription } => {
                    println!("[{}] stopped", subscription);
                    break;
                }
            }
        }
    });

    for i in 0..count {
        // Leave the second half unacknowledged
        if i == count / 2 {
            registry.set_auto_ack(false);
            println!("Auto-ack disabled");
        }

        let mut attributes = HashMap::new();
        attributes.insert("seq".to_string(), i.to_string());
        broker.publish_with_attributes(&topic, format!("order #{i}"), attributes)?;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("Buffered (newest {}):", monitor.buffer().capacity());
    for message in monitor.messages() {
        println!("  {} {}", message.id, message.text().unwrap_or("<binary>"));
    }

    let stats = monitor.stats();
    println!(
        "Stats: received={} acked={} left_unacked={} evicted={}",
        stats.received, stats.acked, stats.left_unacked, stats.evicted
    );

    registry.stop_topic_monitor(&topic).await?;
    printer.await?;

    println!("Deleted subscriptions: {:?}", broker.deleted_subscriptions());
    Ok(())
}
