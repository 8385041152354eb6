#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use message_cache::{CacheConfig, CacheReader, CacheWriter};
use message_source::models::{initialization::Initialization, message::RawMessage};
use message_source::providers::memory::MemorySource;
use message_source::{Error, MessageSource, ProgressCallback};
use tempfile::TempDir;
use tokio::sync::Semaphore;

pub const MS: i64 = 1_000_000;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 3, 4, 0, 0, 0).unwrap()
}

pub fn at_ns(ns: i64) -> DateTime<Utc> {
    t0() + Duration::nanoseconds(ns)
}

pub fn topics(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

pub fn config(dir: &Path) -> CacheConfig {
    CacheConfig {
        cache_dir: dir.to_path_buf(),
        ..CacheConfig::default()
    }
}

/// 300ms recording: "/foo" at 0, 100 and 250ms, "/bar" at 50 and 150ms.
pub fn recording() -> MemorySource {
    MemorySource::new(vec![
        RawMessage::new("/foo", at_ns(0), vec![0]),
        RawMessage::new("/bar", at_ns(50 * MS), vec![1]),
        RawMessage::new("/foo", at_ns(100 * MS), vec![2]),
        RawMessage::new("/bar", at_ns(150 * MS), vec![3]),
        RawMessage::new("/foo", at_ns(250 * MS), vec![4]),
    ])
    .with_bounds(t0(), at_ns(300 * MS - 1))
    .with_datatype("/foo", "std_msgs/UInt8")
    .with_datatype("/bar", "std_msgs/UInt8")
}

/// Reader over writer over an in-memory recording, with its own cache directory.
pub struct Stack {
    pub dir: TempDir,
    pub upstream: Arc<MemorySource>,
    pub writer: CacheWriter,
    pub reader: CacheReader,
}

pub fn stack() -> Stack {
    let dir = TempDir::new().expect("tempdir");
    let cfg = config(dir.path());
    stack_in(dir, cfg, recording())
}

pub fn stack_in(dir: TempDir, cfg: CacheConfig, source: MemorySource) -> Stack {
    message_cache::telemetry::init_for_tests();
    let upstream = Arc::new(source);
    let writer = CacheWriter::new("rec", upstream.clone(), cfg.clone());
    let reader = CacheReader::new("rec", Arc::new(writer.clone()), cfg);
    Stack {
        dir,
        upstream,
        writer,
        reader,
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(StdDuration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Fails the first `failures` fetches, then delegates.
pub struct FlakySource {
    pub inner: MemorySource,
    failures: usize,
    pub attempts: AtomicUsize,
}

impl FlakySource {
    pub fn new(inner: MemorySource, failures: usize) -> Self {
        Self {
            inner,
            failures,
            attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MessageSource for FlakySource {
    async fn initialize(&self, progress: ProgressCallback) -> Result<Initialization, Error> {
        self.inner.initialize(progress).await
    }

    async fn get_messages(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        topics: &[String],
    ) -> Result<Vec<RawMessage>, Error> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(Error::Provider(format!("transient failure #{attempt}")));
        }
        self.inner.get_messages(start, end, topics).await
    }

    async fn close(&self) -> Result<(), Error> {
        self.inner.close().await
    }
}

/// Every fetch waits for a permit, so tests decide when blocks arrive.
pub struct GatedSource {
    pub inner: MemorySource,
    pub gate: Semaphore,
    pub closed: AtomicUsize,
}

impl GatedSource {
    pub fn new(inner: MemorySource) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
            closed: AtomicUsize::new(0),
        }
    }

    pub fn release(&self, fetches: usize) {
        self.gate.add_permits(fetches);
    }
}

#[async_trait]
impl MessageSource for GatedSource {
    async fn initialize(&self, progress: ProgressCallback) -> Result<Initialization, Error> {
        self.inner.initialize(progress).await
    }

    async fn get_messages(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        topics: &[String],
    ) -> Result<Vec<RawMessage>, Error> {
        self.gate
            .acquire()
            .await
            .map_err(|_| Error::Closed)?
            .forget();
        self.inner.get_messages(start, end, topics).await
    }

    async fn close(&self) -> Result<(), Error> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await
    }
}

/// Answers every fetch with an extra message on a topic nobody asked for.
pub struct OffTopicSource {
    pub inner: MemorySource,
}

#[async_trait]
impl MessageSource for OffTopicSource {
    async fn initialize(&self, progress: ProgressCallback) -> Result<Initialization, Error> {
        self.inner.initialize(progress).await
    }

    async fn get_messages(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        topics: &[String],
    ) -> Result<Vec<RawMessage>, Error> {
        let mut messages = self.inner.get_messages(start, end, topics).await?;
        messages.push(RawMessage::new("/not-requested", start, vec![9]));
        Ok(messages)
    }

    async fn close(&self) -> Result<(), Error> {
        self.inner.close().await
    }
}
