//! A source backed by a vector of messages held in memory.
//!
//! Used as the upstream in tests and as the backing store of
//! [`JsonlSource`](crate::providers::jsonl::JsonlSource).

use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    errors::Error,
    models::{
        initialization::{Initialization, Topic},
        message::RawMessage,
        progress::Progress,
    },
    providers::{MessageSource, ProgressCallback},
};

/// One recorded `get_messages` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Inclusive end.
    pub end: DateTime<Utc>,
    /// Requested topics, as passed in.
    pub topics: Vec<String>,
}

/// In-memory [`MessageSource`].
pub struct MemorySource {
    messages: Vec<RawMessage>,
    bounds: Option<(DateTime<Utc>, DateTime<Utc>)>,
    datatypes: BTreeMap<String, String>,
    message_definitions: BTreeMap<String, String>,
    calls: Mutex<Vec<FetchCall>>,
    progress: Mutex<Option<ProgressCallback>>,
}

impl MemorySource {
    /// Create a source over `messages`; they are sorted by receive time (stable).
    pub fn new(mut messages: Vec<RawMessage>) -> Self {
        messages.sort_by_key(|m| m.receive_time);
        Self {
            messages,
            bounds: None,
            datatypes: BTreeMap::new(),
            message_definitions: BTreeMap::new(),
            calls: Mutex::new(Vec::new()),
            progress: Mutex::new(None),
        }
    }

    /// Override the recording bounds (defaults to the first and last receive time).
    pub fn with_bounds(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.bounds = Some((start, end));
        self
    }

    /// Declare the datatype of a topic.
    pub fn with_datatype(mut self, topic: impl Into<String>, datatype: impl Into<String>) -> Self {
        self.datatypes.insert(topic.into(), datatype.into());
        self
    }

    /// Attach a message definition for a datatype.
    pub fn with_definition(mut self, datatype: impl Into<String>, definition: impl Into<String>) -> Self {
        self.message_definitions.insert(datatype.into(), definition.into());
        self
    }

    /// Every `get_messages` call served so far, in order.
    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Push a progress update to whoever initialized this source.
    pub fn report_progress(&self, progress: Progress) {
        let callback = self
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(progress);
        }
    }

    fn bounds(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        self.bounds.or_else(|| {
            let first = self.messages.first()?.receive_time;
            let last = self.messages.last()?.receive_time;
            Some((first, last))
        })
    }

    fn topics(&self) -> Vec<Topic> {
        let mut names: BTreeMap<&str, &str> = BTreeMap::new();
        for m in &self.messages {
            names.entry(m.topic.as_str()).or_insert("");
        }
        for (topic, datatype) in &self.datatypes {
            names.insert(topic.as_str(), datatype.as_str());
        }
        names
            .into_iter()
            .map(|(name, datatype)| Topic {
                name: name.to_string(),
                datatype: datatype.to_string(),
            })
            .collect()
    }
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn initialize(&self, progress: ProgressCallback) -> Result<Initialization, Error> {
        let (start, end) = self
            .bounds()
            .ok_or_else(|| Error::Provider("recording has no messages and no bounds".into()))?;
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner) = Some(progress);
        Ok(Initialization {
            start,
            end,
            topics: self.topics(),
            message_definitions: self.message_definitions.clone(),
        })
    }

    async fn get_messages(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        topics: &[String],
    ) -> Result<Vec<RawMessage>, Error> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(FetchCall {
                start,
                end,
                topics: topics.to_vec(),
            });

        Ok(self
            .messages
            .iter()
            .filter(|m| m.receive_time >= start && m.receive_time <= end)
            .filter(|m| topics.iter().any(|t| *t == m.topic))
            .cloned()
            .collect())
    }

    async fn close(&self) -> Result<(), Error> {
        self.progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }
}
