//! What a source reports about itself when it is initialized.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A topic available in the recording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    /// Topic name (e.g. "/foo").
    pub name: String,
    /// Name of the message type published on the topic.
    pub datatype: String,
}

/// Result of [`MessageSource::initialize`](crate::MessageSource::initialize).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initialization {
    /// Receive time of the first message (inclusive).
    pub start: DateTime<Utc>,
    /// Receive time of the last message (inclusive).
    pub end: DateTime<Utc>,
    /// Topics present in the recording.
    pub topics: Vec<Topic>,
    /// Message definitions keyed by datatype.
    pub message_definitions: BTreeMap<String, String>,
}
