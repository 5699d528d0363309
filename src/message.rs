//! Message types
//!
//! [`RawMessage`] is what a broker stream hands out. It is decoded into an
//! immutable [`ReceivedMessage`] before it reaches a buffer or an event sink.

use std::collections::HashMap;
use std::time::SystemTime;

use bytes::Bytes;

use crate::error::{Error, Result};

/// Opaque token used to acknowledge one delivery
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckId(pub String);

impl AckId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A message as delivered by the broker, before decoding
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawMessage {
    /// Delivery token for acknowledgement
    pub ack_id: String,
    /// Broker-assigned message ID
    pub message_id: String,
    /// Message payload
    pub data: Bytes,
    /// Message attributes
    pub attributes: HashMap<String, String>,
    /// Publish time, if the broker reported one
    pub publish_time: Option<SystemTime>,
    /// Delivery attempt counter (0 when dead-lettering is not configured)
    pub delivery_attempt: i32,
    /// Ordering key ("" when unset)
    pub ordering_key: String,
}

/// A decoded message held in a monitor's buffer
///
/// Cheap to share: buffers and events hold it behind an `Arc`, and the
/// payload is reference counted.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    /// Broker-assigned message ID
    pub id: String,
    /// When the message was published
    pub publish_time: SystemTime,
    /// When this process received it
    pub receive_time: SystemTime,
    /// Message payload
    pub data: Bytes,
    /// Message attributes
    pub attributes: HashMap<String, String>,
    /// Delivery attempt counter, when the broker tracks it
    pub delivery_attempt: Option<u32>,
    /// Ordering key, when set
    pub ordering_key: Option<String>,
}

impl ReceivedMessage {
    /// Decode a raw delivery
    ///
    /// Returns the decoded message and the token needed to acknowledge it.
    pub fn decode(raw: RawMessage, receive_time: SystemTime) -> Result<(Self, AckId)> {
        if raw.message_id.is_empty() {
            return Err(Error::Decode("delivery without message id".into()));
        }
        if raw.ack_id.is_empty() {
            return Err(Error::Decode(format!(
                "message {} has no ack id",
                raw.message_id
            )));
        }

        let message = Self {
            id: raw.message_id,
            publish_time: raw.publish_time.unwrap_or(receive_time),
            receive_time,
            data: raw.data,
            attributes: raw.attributes,
            delivery_attempt: u32::try_from(raw.delivery_attempt).ok().filter(|n| *n > 0),
            ordering_key: Some(raw.ordering_key).filter(|k| !k.is_empty()),
        };

        Ok((message, AckId(raw.ack_id)))
    }

    /// Payload as text, if it is valid UTF-8
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}
