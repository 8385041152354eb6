//! The caching layer that talks to the upstream source.
//!
//! [`CacheWriter`] downloads from the upstream in blocks of
//! [`CacheConfig::block_size_ns`] and commits each block, together with the
//! coverage it completes, in one transaction. It never returns messages itself:
//! `get_messages` resolves (with an empty vector) once the requested range is
//! covered, and the reader above fetches the data from the database.
//!
//! At most one upstream connection runs at a time. Every connection carries a
//! generation number; whenever the planner replaces or cancels a connection the
//! generation moves on, and the old task notices before its next write and stops.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use message_source::models::{
    initialization::Initialization,
    message::RawMessage,
    progress::{FractionRange, Progress},
    range::Range,
    time::{from_offset_ns, request_range, to_offset_ns, total_ns},
};
use message_source::providers::ignore_progress;
use message_source::{Error, MessageSource, ProgressCallback};
use once_cell::sync::OnceCell;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::CacheConfig;
use crate::coverage::CoverageMap;
use crate::error::{CacheError, CacheResult};
use crate::models::StoredMessage;
use crate::planner::{PlanInput, plan};
use crate::ranges::{is_covered, missing};
use crate::store::CacheStore;

/// Recording start and length, known after `initialize`.
#[derive(Debug, Clone, Copy)]
struct Timeline {
    start: DateTime<Utc>,
    total_ns: i64,
}

/// A progress snapshot tagged with the order it was taken in.
type Snapshot = (u64, Progress);

/// The upstream connection currently downloading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Correlates log lines of one connection.
    pub id: Uuid,
    /// Writes are accepted only while this matches the writer's current generation.
    pub generation: u64,
    /// Sorted topic set being downloaded.
    pub topics: Vec<String>,
    /// Part of the planned range not yet persisted.
    pub remaining: Range,
}

struct ReadRequest {
    range: Range,
    topics: Vec<String>,
    done: oneshot::Sender<()>,
}

#[derive(Default)]
struct WriterState {
    preload_topics: Vec<String>,
    coverage: CoverageMap,
    connection: Option<Connection>,
    generation: u64,
    read_requests: VecDeque<ReadRequest>,
    last_resolved_end: Option<i64>,
    snapshot_seq: u64,
    closed: bool,
    /// Set once a connection task panicked; every waiter re-raises it.
    aborted: Option<String>,
}

impl WriterState {
    /// Topics of the oldest pending request, else the most recently requested ones.
    fn current_topics(&self) -> Vec<String> {
        self.read_requests
            .front()
            .map(|r| r.topics.clone())
            .unwrap_or_else(|| self.preload_topics.clone())
    }

    fn connection_for(&self, generation: u64) -> Option<&Connection> {
        self.connection.as_ref().filter(|c| c.generation == generation)
    }

    fn snapshot(&mut self, timeline: Timeline) -> Snapshot {
        self.snapshot_seq += 1;
        let total = timeline.total_ns as f64;
        let fully_loaded_fraction_ranges = self
            .coverage
            .downloaded(&self.current_topics())
            .iter()
            .map(|r| FractionRange {
                start: r.start as f64 / total,
                end: r.end as f64 / total,
            })
            .collect();
        (
            self.snapshot_seq,
            Progress {
                fully_loaded_fraction_ranges,
                ns_ranges_by_topic: Some(self.coverage.as_map().clone()),
            },
        )
    }
}

struct WriterInner {
    id: String,
    upstream: Arc<dyn MessageSource>,
    config: CacheConfig,
    store: OnceCell<Arc<CacheStore>>,
    timeline: OnceCell<Timeline>,
    state: Mutex<WriterState>,
    listeners: Mutex<Vec<ProgressCallback>>,
    published_seq: Mutex<u64>,
    /// Serializes the clone, commit and swap of the coverage map.
    commit: Mutex<()>,
}

/// Downloads from an upstream [`MessageSource`] into the cache database.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct CacheWriter {
    inner: Arc<WriterInner>,
}

impl CacheWriter {
    /// Wrap `upstream`. `id` names the cache database and must be stable for the
    /// same recording across runs.
    pub fn new(id: impl Into<String>, upstream: Arc<dyn MessageSource>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(WriterInner {
                id: id.into(),
                upstream,
                config,
                store: OnceCell::new(),
                timeline: OnceCell::new(),
                state: Mutex::new(WriterState::default()),
                listeners: Mutex::new(Vec::new()),
                published_seq: Mutex::new(0),
                commit: Mutex::new(()),
            }),
        }
    }

    /// Receive every progress snapshot from now on.
    pub fn subscribe(&self, listener: ProgressCallback) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Current in-memory coverage. It catches up with the database as each commit finishes.
    pub fn coverage(&self) -> CoverageMap {
        self.inner.lock_state().coverage.clone()
    }

    /// The running connection, if any.
    pub fn connection(&self) -> Option<Connection> {
        self.inner.lock_state().connection.clone()
    }

    /// Wait until `range` (offsets from the recording start) is covered for
    /// `topics`, downloading whatever is missing.
    ///
    /// The range is clamped to the recording first; a range entirely outside it
    /// resolves at once. The request also becomes the new preload topic set.
    /// Dropping the returned future abandons the request.
    ///
    /// # Panics
    ///
    /// If a connection task panicked because the upstream broke its contract.
    pub async fn request(&self, range: Range, topics: &[String]) -> Result<(), Error> {
        let inner = &self.inner;
        let timeline = *inner.timeline.get().ok_or(CacheError::NotInitialized)?;
        let range = Range::new(range.start.max(0), range.end.min(timeline.total_ns));
        if let Some(capacity) = inner.config.cache_capacity_ns
            && range.len() > capacity
        {
            return Err(Error::RangeExceedsCapacity {
                requested_ns: range.len(),
                capacity_ns: capacity,
            });
        }
        inner.check_aborted();
        if range.is_empty() {
            return Ok(());
        }
        let topics = normalize_topics(topics);

        let (done, resolved) = oneshot::channel();
        {
            let mut state = inner.lock_state();
            if let Some(reason) = &state.aborted {
                panic!("cache writer aborted: {reason}");
            }
            if state.closed {
                return Err(Error::Closed);
            }
            state.preload_topics = topics.clone();
            state.read_requests.push_back(ReadRequest {
                range,
                topics,
                done,
            });
        }
        inner.reconcile();
        if resolved.await.is_err() {
            inner.check_aborted();
            return Err(Error::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageSource for CacheWriter {
    async fn initialize(&self, progress: ProgressCallback) -> Result<Initialization, Error> {
        let inner = &self.inner;
        if inner.store.get().is_none() {
            let config = inner.config.clone();
            let id = inner.id.clone();
            let (store, coverage) = tokio::task::spawn_blocking(move || -> CacheResult<_> {
                let store = CacheStore::open(&config, &id)?;
                let coverage = store.load_coverage()?;
                Ok((store, coverage))
            })
            .await
            .map_err(CacheError::from)??;
            if inner.store.set(Arc::new(store)).is_ok() {
                inner.lock_state().coverage = coverage;
            }
        }

        // Upstream progress is not meaningful to layers above the cache.
        let init = inner.upstream.initialize(ignore_progress()).await?;
        let timeline = Timeline {
            start: init.start,
            total_ns: total_ns(init.start, init.end)?,
        };
        let _ = inner.timeline.set(timeline);
        info!(
            id = %inner.id,
            range_start = 0,
            range_end = timeline.total_ns,
            topics = init.topics.len(),
            "cache writer initialized"
        );

        self.subscribe(progress);
        let snapshot = inner.lock_state().snapshot(timeline);
        inner.publish(snapshot);
        Ok(init)
    }

    async fn get_messages(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        topics: &[String],
    ) -> Result<Vec<RawMessage>, Error> {
        let timeline = *self.inner.timeline.get().ok_or(CacheError::NotInitialized)?;
        let range = request_range(timeline.start, start, end)?;
        self.request(range, topics).await?;
        Ok(Vec::new())
    }

    async fn close(&self) -> Result<(), Error> {
        {
            let mut state = self.inner.lock_state();
            state.closed = true;
            state.generation += 1;
            state.connection = None;
            // Dropping the senders fails every waiter with `Error::Closed`.
            state.read_requests.clear();
        }
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.inner.upstream.close().await
    }
}

impl WriterInner {
    fn lock_state(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_aborted(&self) {
        let aborted = self.lock_state().aborted.clone();
        if let Some(reason) = aborted {
            panic!("cache writer aborted: {reason}");
        }
    }

    /// A connection task panicked: stop the writer and fail every waiter with
    /// the same panic.
    fn abort(&self, reason: String) {
        error!(id = %self.id, reason = %reason, "connection task panicked; aborting cache writer");
        let mut state = self.lock_state();
        state.aborted = Some(reason);
        state.generation += 1;
        state.connection = None;
        // Waiters see their sender dropped, then find `aborted` set.
        state.read_requests.clear();
    }

    /// Deliver `snapshot` unless a newer one already went out.
    fn publish(&self, (seq, progress): Snapshot) {
        let mut published = self
            .published_seq
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if seq <= *published {
            return;
        }
        *published = seq;
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            listener(progress.clone());
        }
    }

    /// Resolve covered requests, drop a connection whose topics no longer match,
    /// and start a new connection if the planner asks for one.
    fn reconcile(self: &Arc<Self>) {
        let Some(timeline) = self.timeline.get().copied() else {
            return;
        };
        let snapshot = {
            let mut state = self.lock_state();
            if state.closed || state.aborted.is_some() {
                return;
            }
            resolve_requests(&mut state);

            let topics = state.current_topics();
            if let Some(current) = &state.connection
                && current.topics != topics
            {
                info!(connection_id = %current.id, topics = ?topics, "topics changed; cancelling connection");
                state.connection = None;
            }

            let downloaded = state.coverage.downloaded(&topics);
            let next = plan(&PlanInput {
                current_remaining: state.connection.as_ref().map(|c| c.remaining),
                read_request_range: state.read_requests.front().map(|r| r.range),
                downloaded: &downloaded,
                last_resolved_end: state.last_resolved_end,
                cache_capacity: self.config.cache_capacity_ns,
                total_size: timeline.total_ns,
                prefetch_threshold: self.config.prefetch_threshold(),
            });
            if let Some(range) = next {
                self.start_connection(&mut state, range, topics);
            }
            state.snapshot(timeline)
        };
        self.publish(snapshot);
    }

    fn start_connection(self: &Arc<Self>, state: &mut WriterState, range: Range, topics: Vec<String>) {
        state.generation += 1;
        if topics.is_empty() {
            state.connection = None;
            return;
        }
        let connection = Connection {
            id: Uuid::new_v4(),
            generation: state.generation,
            topics,
            remaining: range,
        };
        info!(
            connection_id = %connection.id,
            topics = ?connection.topics,
            range_start = range.start,
            range_end = range.end,
            "starting upstream connection"
        );
        state.connection = Some(connection.clone());
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move { inner.run_connection(connection).await });
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = task.await
                && e.is_panic()
            {
                supervisor.abort(panic_message(e.into_panic()));
            }
        });
    }

    async fn run_connection(self: Arc<Self>, connection: Connection) {
        let Connection {
            id,
            generation,
            remaining,
            ..
        } = connection;
        let end = remaining.end;
        loop {
            let Some((block, topics)) = self.next_block(generation, end) else {
                debug!(connection_id = %id, "connection superseded");
                return;
            };
            match self.fetch_and_persist(id, generation, block, &topics).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(connection_id = %id, "connection superseded at commit");
                    return;
                }
                Err(e) => {
                    error!(
                        connection_id = %id,
                        range_start = block.start,
                        range_end = block.end,
                        error = %e,
                        "upstream connection failed"
                    );
                    self.clear_connection(generation);
                    return;
                }
            }
            let Some(finished) = self.advance(generation, block.end, end) else {
                return;
            };
            self.reconcile();
            if finished {
                info!(connection_id = %id, "connection finished");
                return;
            }
        }
    }

    /// Next block of the connection, narrowed so that every returned topic is
    /// missing over all of it.
    fn next_block(&self, generation: u64, end: i64) -> Option<(Range, Vec<String>)> {
        let state = self.lock_state();
        let connection = state.connection_for(generation)?;
        let start = connection.remaining.start;
        let mut block = Range::new(start, start.saturating_add(self.config.block_size_ns).min(end));
        let topics = narrow_block(&mut block, &connection.topics, &state.coverage);
        Some((block, topics))
    }

    /// Fetch one block and commit it. `Ok(false)` means the connection was
    /// superseded, either before the write or while it was in flight.
    async fn fetch_and_persist(
        self: &Arc<Self>,
        id: Uuid,
        generation: u64,
        block: Range,
        topics: &[String],
    ) -> CacheResult<bool> {
        let timeline = *self.timeline.get().ok_or(CacheError::NotInitialized)?;
        let store = Arc::clone(self.store.get().ok_or(CacheError::NotInitialized)?);

        let messages = if topics.is_empty() {
            Vec::new()
        } else {
            let start = from_offset_ns(timeline.start, block.start)?;
            let end = from_offset_ns(timeline.start, block.end - 1)?;
            debug!(
                connection_id = %id,
                topics = ?topics,
                range_start = block.start,
                range_end = block.end,
                "fetching block"
            );
            self.upstream.get_messages(start, end, topics).await?
        };
        let rows = block_rows(
            messages,
            topics,
            block,
            timeline.start,
            self.config.oversized_message_bytes,
        )?;
        let count = rows.len();

        let inner = Arc::clone(self);
        let topics = topics.to_vec();
        let committed = tokio::task::spawn_blocking(move || -> CacheResult<Option<(bool, Snapshot)>> {
            let _commit = inner.commit.lock().unwrap_or_else(PoisonError::into_inner);
            let coverage = {
                let state = inner.lock_state();
                if state.connection_for(generation).is_none() {
                    return Ok(None);
                }
                let mut coverage = state.coverage.clone();
                for topic in &topics {
                    coverage.insert(topic.clone(), block);
                }
                coverage
            };
            // The state lock is released while SQLite works.
            store.put_batch(&rows, &coverage)?;
            let mut state = inner.lock_state();
            state.coverage = coverage;
            let current = state.connection_for(generation).is_some();
            Ok(Some((current, state.snapshot(timeline))))
        })
        .await??;

        let Some((current, snapshot)) = committed else {
            return Ok(false);
        };
        debug!(
            connection_id = %id,
            range_start = block.start,
            range_end = block.end,
            messages = count,
            "persisted block"
        );
        self.publish(snapshot);
        Ok(current)
    }

    /// Move the connection past `block_end`. `Some(true)` when it reached `end`,
    /// `None` when it was superseded.
    fn advance(&self, generation: u64, block_end: i64, end: i64) -> Option<bool> {
        let mut state = self.lock_state();
        {
            let connection = state
                .connection
                .as_mut()
                .filter(|c| c.generation == generation)?;
            connection.remaining = Range::new(block_end, end);
        }
        if block_end >= end {
            state.connection = None;
            return Some(true);
        }
        Some(false)
    }

    fn clear_connection(&self, generation: u64) {
        let mut state = self.lock_state();
        if state.connection_for(generation).is_some() {
            state.connection = None;
        }
    }
}

/// Resolve every pending request that is now covered, oldest first.
fn resolve_requests(state: &mut WriterState) {
    let pending = std::mem::take(&mut state.read_requests);
    for request in pending {
        if request.done.is_closed() {
            continue;
        }
        if request.topics.is_empty() {
            let _ = request.done.send(());
            continue;
        }
        if is_covered(request.range, &state.coverage.downloaded(&request.topics)) {
            state.last_resolved_end = Some(request.range.end);
            let _ = request.done.send(());
        } else {
            state.read_requests.push_back(request);
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "connection task panicked".to_string())
}

/// Sorted, de-duplicated topic set.
fn normalize_topics(topics: &[String]) -> Vec<String> {
    let mut topics = topics.to_vec();
    topics.sort();
    topics.dedup();
    topics
}

/// Shrink `block` from the end until each connection topic is either missing over
/// all of it or covered over all of it, and return the missing ones.
fn narrow_block(block: &mut Range, topics: &[String], coverage: &CoverageMap) -> Vec<String> {
    let mut wanted = Vec::new();
    for topic in topics {
        let Some(gap) = missing(*block, coverage.get(topic)).first().copied() else {
            continue;
        };
        if block.start < gap.start {
            *block = Range::new(block.start, gap.start);
        } else {
            if gap.end < block.end {
                *block = Range::new(block.start, gap.end);
            }
            wanted.push(topic.clone());
        }
    }
    wanted
}

/// Convert a fetched block into rows, keyed by position within the block.
///
/// # Panics
///
/// If the upstream returned a topic that was not requested or a message outside
/// the block; either would make the stored coverage wrong.
fn block_rows(
    messages: Vec<RawMessage>,
    topics: &[String],
    block: Range,
    recording_start: DateTime<Utc>,
    oversized_message_bytes: usize,
) -> CacheResult<Vec<StoredMessage>> {
    messages
        .into_iter()
        .enumerate()
        .map(|(sequence, message)| {
            assert!(
                topics.contains(&message.topic),
                "upstream returned a message on unrequested topic {:?}",
                message.topic
            );
            let offset = to_offset_ns(recording_start, message.receive_time)?;
            assert!(
                block.contains(offset),
                "upstream returned a message at offset {offset} outside {block}"
            );
            if message.data.len() > oversized_message_bytes {
                warn!(
                    topic = %message.topic,
                    bytes = message.data.len(),
                    "suspiciously large message"
                );
            }
            Ok(StoredMessage::new(offset, sequence, message.topic, message.data))
        })
        .collect()
}
