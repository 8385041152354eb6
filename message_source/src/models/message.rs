//! Canonical in-memory representation of one recorded message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single serialized message as it was received on a topic.
///
/// The payload is opaque to every caching layer; it is stored and returned byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Logical topic the message was published on (e.g. "/foo").
    pub topic: String,
    /// Receive timestamp (UTC, nanosecond precision).
    pub receive_time: DateTime<Utc>,
    /// Serialized message bytes.
    pub data: Vec<u8>,
}

impl RawMessage {
    /// Convenience constructor.
    pub fn new(topic: impl Into<String>, receive_time: DateTime<Utc>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            receive_time,
            data: data.into(),
        }
    }
}
