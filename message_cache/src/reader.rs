//! The caching layer that serves messages from the database.

use std::collections::BTreeSet;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use message_source::models::{
    initialization::Initialization,
    message::RawMessage,
    progress::Progress,
    time::{from_offset_ns, request_range},
};
use message_source::{Error, MessageSource, ProgressCallback};
use once_cell::sync::OnceCell;
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::coverage::CoverageMap;
use crate::error::{CacheError, CacheResult};
use crate::ranges::is_covered;
use crate::store::CacheStore;

/// Serves `get_messages` from the cache database, using the layer beneath it
/// (normally a [`CacheWriter`](crate::writer::CacheWriter)) only to make sure the
/// data is there.
///
/// The reader keeps its own view of the coverage, fed by the progress snapshots of
/// the layer beneath. A covered request is answered straight from disk and the
/// layer beneath is merely told about it, so that it can prefetch further ahead.
pub struct CacheReader {
    id: String,
    child: Arc<dyn MessageSource>,
    config: CacheConfig,
    store: OnceCell<Arc<CacheStore>>,
    start_time: OnceCell<DateTime<Utc>>,
    coverage: Arc<ArcSwap<CoverageMap>>,
}

impl CacheReader {
    /// `id` must match the one the writer beneath was created with.
    pub fn new(id: impl Into<String>, child: Arc<dyn MessageSource>, config: CacheConfig) -> Self {
        Self {
            id: id.into(),
            child,
            config,
            store: OnceCell::new(),
            start_time: OnceCell::new(),
            coverage: Arc::new(ArcSwap::from_pointee(CoverageMap::default())),
        }
    }

    /// The coverage last reported by the layer beneath.
    pub fn coverage(&self) -> Arc<CoverageMap> {
        self.coverage.load_full()
    }

    fn store(&self) -> CacheResult<Arc<CacheStore>> {
        self.store.get().cloned().ok_or(CacheError::NotInitialized)
    }
}

#[async_trait]
impl MessageSource for CacheReader {
    async fn initialize(&self, progress: ProgressCallback) -> Result<Initialization, Error> {
        if self.store.get().is_none() {
            let config = self.config.clone();
            let id = self.id.clone();
            let store = tokio::task::spawn_blocking(move || CacheStore::open(&config, &id))
                .await
                .map_err(CacheError::from)??;
            let _ = self.store.set(Arc::new(store));
        }

        let coverage = Arc::clone(&self.coverage);
        let forward = Arc::clone(&progress);
        let init = self
            .child
            .initialize(Arc::new(move |p: Progress| {
                let Some(map) = p.ns_ranges_by_topic.clone() else {
                    panic!("the layer beneath a cache reader must report ns_ranges_by_topic");
                };
                coverage.store(Arc::new(CoverageMap::from(map)));
                forward(p);
            }))
            .await?;
        let _ = self.start_time.set(init.start);
        debug!(id = %self.id, "cache reader initialized");
        Ok(init)
    }

    async fn get_messages(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        topics: &[String],
    ) -> Result<Vec<RawMessage>, Error> {
        let recording_start = *self.start_time.get().ok_or(CacheError::NotInitialized)?;
        let range = request_range(recording_start, start, end)?;
        let store = self.store()?;

        let covered = is_covered(range, &self.coverage.load().downloaded(topics));
        if covered {
            // Let the writer know where reading happens, without waiting for it.
            let child = Arc::clone(&self.child);
            let signal_topics = topics.to_vec();
            tokio::spawn(async move {
                if let Err(e) = child.get_messages(start, end, &signal_topics).await {
                    trace!(error = %e, "read signal was not delivered");
                }
            });
        } else {
            let returned = self.child.get_messages(start, end, topics).await?;
            assert!(
                returned.is_empty(),
                "the layer beneath a cache reader must not return messages"
            );
        }

        let wanted: BTreeSet<String> = topics.iter().cloned().collect();
        let rows = tokio::task::spawn_blocking(move || store.read_range(&wanted, range))
            .await
            .map_err(CacheError::from)??;
        debug!(
            range_start = range.start,
            range_end = range.end,
            messages = rows.len(),
            "served from cache"
        );

        rows.into_iter()
            .map(|row| {
                Ok(RawMessage {
                    topic: row.topic,
                    receive_time: from_offset_ns(recording_start, row.timestamp_ns)?,
                    data: row.payload,
                })
            })
            .collect()
    }

    async fn close(&self) -> Result<(), Error> {
        self.child.close().await
    }
}
