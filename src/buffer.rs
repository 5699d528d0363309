//! Bounded message buffer
//!
//! Each monitor keeps the most recent messages it received so a late viewer
//! can see recent traffic. Once the buffer is full, every append evicts the
//! oldest message.
//!
//! The buffer carries its own lock, so readers of one monitor never contend
//! with the writer of another.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::message::ReceivedMessage;

/// Bounded FIFO of received messages for one monitor
#[derive(Debug)]
pub struct MessageBuffer {
    /// Maximum number of messages retained
    capacity: NonZeroUsize,
    /// Buffered messages, oldest first
    messages: RwLock<VecDeque<Arc<ReceivedMessage>>>,
    /// Messages dropped to make room
    evicted: AtomicU64,
}

impl MessageBuffer {
    /// Create an empty buffer holding at most `capacity` messages
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            messages: RwLock::new(VecDeque::with_capacity(capacity.get().min(1024))),
            evicted: AtomicU64::new(0),
        }
    }

    /// Add a message to the tail
    ///
    /// Returns the evicted head if the buffer was already full.
    pub fn append(&self, message: Arc<ReceivedMessage>) -> Option<Arc<ReceivedMessage>> {
        let mut messages = self.messages.write();
        messages.push_back(message);

        if messages.len() > self.capacity.get() {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            messages.pop_front()
        } else {
            None
        }
    }

    /// Copy of the current contents in arrival order
    pub fn snapshot(&self) -> Vec<Arc<ReceivedMessage>> {
        self.messages.read().iter().cloned().collect()
    }

    /// Most recently appended message
    pub fn latest(&self) -> Option<Arc<ReceivedMessage>> {
        self.messages.read().back().cloned()
    }

    /// Drop every buffered message
    pub fn clear(&self) {
        self.messages.write().clear();
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Total messages evicted since creation
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::SystemTime;

    use bytes::Bytes;

    use super::*;

    fn make_message(id: &str) -> Arc<ReceivedMessage> {
        let now = SystemTime::now();
        Arc::new(ReceivedMessage {
            id: id.to_string(),
            publish_time: now,
            receive_time: now,
            data: Bytes::copy_from_slice(id.as_bytes()),
            attributes: HashMap::new(),
            delivery_attempt: None,
            ordering_key: None,
        })
    }

    fn ids(buffer: &MessageBuffer) -> Vec<String> {
        buffer.snapshot().iter().map(|m| m.id.clone()).collect()
    }

    fn capacity(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_evicts_oldest() {
        let buffer = MessageBuffer::new(capacity(3));

        for id in ["A", "B", "C"] {
            assert!(buffer.append(make_message(id)).is_none());
        }
        let evicted = buffer.append(make_message("D")).unwrap();

        assert_eq!(evicted.id, "A");
        assert_eq!(ids(&buffer), vec!["B", "C", "D"]);
        assert_eq!(buffer.evicted(), 1);
    }

    #[test]
    fn test_keeps_last_c_for_any_overflow() {
        for cap in 1..=5usize {
            let buffer = MessageBuffer::new(capacity(cap));
            let total = cap * 3 + 1;
            for i in 0..total {
                buffer.append(make_message(&i.to_string()));
                assert!(buffer.len() <= cap);
            }

            let expected: Vec<String> = (total - cap..total).map(|i| i.to_string()).collect();
            assert_eq!(ids(&buffer), expected);
            assert_eq!(buffer.evicted(), (total - cap) as u64);
        }
    }

    #[test]
    fn test_snapshot_is_detached() {
        let buffer = MessageBuffer::new(capacity(4));
        buffer.append(make_message("A"));

        let mut snapshot = buffer.snapshot();
        snapshot.clear();
        buffer.append(make_message("B"));

        assert_eq!(ids(&buffer), vec!["A", "B"]);
    }

    #[test]
    fn test_clear() {
        let buffer = MessageBuffer::new(capacity(2));
        buffer.append(make_message("A"));
        buffer.append(make_message("B"));

        buffer.clear();

        assert!(buffer.is_empty());
        assert!(buffer.latest().is_none());
        assert_eq!(buffer.capacity(), 2);
    }

    #[test]
    fn test_latest() {
        let buffer = MessageBuffer::new(capacity(2));
        buffer.append(make_message("A"));
        buffer.append(make_message("B"));

        assert_eq!(buffer.latest().unwrap().id, "B");
    }

    #[test]
    fn test_concurrent_readers_see_bounded_state() {
        let buffer = Arc::new(MessageBuffer::new(capacity(8)));

        let writer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for i in 0..1000 {
                    buffer.append(make_message(&i.to_string()));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let buffer = Arc::clone(&buffer);
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let snapshot = buffer.snapshot();
                        assert!(snapshot.len() <= 8);
                        // Arrival order is preserved in every snapshot
                        let nums: Vec<u32> =
                            snapshot.iter().map(|m| m.id.parse().unwrap()).collect();
                        assert!(nums.windows(2).all(|w| w[0] + 1 == w[1]));
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(buffer.len(), 8);
        assert_eq!(buffer.latest().unwrap().id, "999");
    }
}
