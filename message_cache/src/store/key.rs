//! Primary keys of the `messages` table.

use std::fmt;
use std::str::FromStr;

use crate::error::CacheError;

const SEPARATOR: &str = "|||";

/// Parsed form of `"{timestamp_ns}|||{sequence}|||{topic}"`.
///
/// The sequence is the message's position in the block it was fetched with, which
/// keeps messages sharing a timestamp distinct and in upstream order. Topics may
/// themselves contain the separator; everything after the second one is the topic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MessageKey {
    /// Offset from the recording start.
    pub timestamp_ns: i64,
    /// Position within the fetched block.
    pub sequence: usize,
    /// Topic name.
    pub topic: String,
}

impl MessageKey {
    /// Assemble a key from its parts.
    pub fn new(timestamp_ns: i64, sequence: usize, topic: impl Into<String>) -> Self {
        Self {
            timestamp_ns,
            sequence,
            topic: topic.into(),
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.timestamp_ns, self.sequence, self.topic
        )
    }
}

impl FromStr for MessageKey {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CacheError::InvalidKey(s.to_string());
        let mut parts = s.splitn(3, SEPARATOR);
        let timestamp_ns = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let sequence = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let topic = parts.next().ok_or_else(invalid)?;
        Ok(Self::new(timestamp_ns, sequence, topic))
    }
}
