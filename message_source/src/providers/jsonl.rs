//! A recording stored as JSON lines, one message per line.
//!
//! ```text
//! {"topic":"/foo","receive_time":"2021-03-04T00:00:00.000000001Z","data":[1,2,3]}
//! {"topic":"/bar","receive_time":"2021-03-04T00:00:01Z","data":[],"datatype":"std_msgs/Empty"}
//! ```
//!
//! Blank lines are skipped. The whole file is loaded up front and served from memory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use snafu::{Backtrace, ResultExt, Snafu};

use crate::{
    errors::Error,
    models::{initialization::Initialization, message::RawMessage},
    providers::{MessageSource, ProgressCallback, memory::MemorySource},
};

/// Errors that can occur while loading a recording file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RecordingError {
    /// The file could not be read.
    #[snafu(display("Failed to read recording {}: {source}", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// A line is not a valid message record.
    #[snafu(display("Invalid record on line {line}: {source}"))]
    Parse {
        line: usize,
        source: serde_json::Error,
        backtrace: Backtrace,
    },

    /// The file holds no messages, so the recording has no bounds.
    #[snafu(display("Recording {} contains no messages", path.display()))]
    Empty { path: PathBuf, backtrace: Backtrace },
}

impl From<RecordingError> for Error {
    fn from(e: RecordingError) -> Self {
        Error::Provider(e.to_string())
    }
}

#[derive(Deserialize)]
struct Record {
    topic: String,
    receive_time: DateTime<Utc>,
    #[serde(default)]
    data: Vec<u8>,
    #[serde(default)]
    datatype: Option<String>,
}

/// [`MessageSource`] over a JSON-lines recording.
pub struct JsonlSource {
    inner: MemorySource,
}

impl JsonlSource {
    /// Load and parse the recording at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RecordingError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .context(ReadSnafu { path })?;
        Self::parse(&text, path)
    }

    fn parse(text: &str, path: &Path) -> Result<Self, RecordingError> {
        let mut messages = Vec::new();
        let mut datatypes = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(line).context(ParseSnafu { line: idx + 1 })?;
            if let Some(datatype) = record.datatype {
                datatypes.push((record.topic.clone(), datatype));
            }
            messages.push(RawMessage::new(record.topic, record.receive_time, record.data));
        }
        if messages.is_empty() {
            return EmptySnafu { path }.fail();
        }

        tracing::debug!(path = %path.display(), messages = messages.len(), "Loaded recording");
        let inner = datatypes
            .into_iter()
            .fold(MemorySource::new(messages), |s, (topic, datatype)| {
                s.with_datatype(topic, datatype)
            });
        Ok(Self { inner })
    }
}

#[async_trait]
impl MessageSource for JsonlSource {
    async fn initialize(&self, progress: ProgressCallback) -> Result<Initialization, Error> {
        self.inner.initialize(progress).await
    }

    async fn get_messages(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        topics: &[String],
    ) -> Result<Vec<RawMessage>, Error> {
        self.inner.get_messages(start, end, topics).await
    }

    async fn close(&self) -> Result<(), Error> {
        self.inner.close().await
    }
}
