//! Row types for the cache and meta databases.

use diesel::prelude::*;

use crate::schema::{databases, messages};
use crate::store::key::MessageKey;

/// One persisted message.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = messages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StoredMessage {
    /// `"{timestamp_ns}|||{sequence}|||{topic}"`.
    pub primary_key: String,
    /// Offset from the recording start.
    pub timestamp_ns: i64,
    /// Topic name, repeated from the key for filtering.
    pub topic: String,
    /// Serialized message body, stored as is.
    pub payload: Vec<u8>,
}

impl StoredMessage {
    /// Build a row, deriving the primary key from its parts. `sequence` is the
    /// message's index within the fetched block.
    pub fn new(timestamp_ns: i64, sequence: usize, topic: impl Into<String>, payload: Vec<u8>) -> Self {
        let topic = topic.into();
        let primary_key = MessageKey::new(timestamp_ns, sequence, topic.clone()).to_string();
        Self {
            primary_key,
            timestamp_ns,
            topic,
            payload,
        }
    }
}

/// A cache database registered in the meta database.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = databases)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DatabaseEntry {
    /// Database name, also the file stem under the cache directory.
    pub name: String,
    /// RFC3339 UTC time of the last open.
    pub last_access: String,
    /// Monotonic open counter; larger is more recent.
    pub access_seq: i64,
}
