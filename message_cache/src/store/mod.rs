//! Durable storage of messages and coverage for one recording.
//!
//! Each recording gets its own SQLite file, `message-cache-v1-{id}.sqlite`, next to
//! the shared [`meta`] database that tracks recency for eviction. A batch of messages
//! and the coverage it completes are always written in one transaction, so a crash
//! never leaves coverage claiming messages that are not on disk.

pub mod key;
pub mod meta;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use diesel::prelude::*;
use message_source::models::range::Range;
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::coverage::CoverageMap;
use crate::db::{connection::connect_sqlite, migrate::run_cache_migrations};
use crate::error::{CacheError, CacheResult};
use crate::models::StoredMessage;
use crate::schema::{messages, topic_ranges};
use key::MessageKey;
use meta::{MetaDatabase, database_path};

/// Prefix of every cache database name; bumped when the layout changes.
pub const DB_NAME_PREFIX: &str = "message-cache-v1";

/// SQLite bound-parameter budget per statement.
const MAX_BIND_PARAMS: usize = 900;

/// Name of the cache database for a recording id. Characters outside
/// `[A-Za-z0-9_-]` are replaced so the name is a safe file stem.
pub fn database_name(id: &str) -> String {
    let sanitized: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{DB_NAME_PREFIX}-{sanitized}")
}

/// One recording's cache database.
pub struct CacheStore {
    name: String,
    path: PathBuf,
    conn: Mutex<SqliteConnection>,
}

impl CacheStore {
    /// Open the database for `id`, registering it in the meta database first (which
    /// may evict older databases) and applying migrations.
    ///
    /// Both caching layers open their own `CacheStore` on the same file; WAL mode
    /// lets the reader query while the writer commits.
    pub fn open(config: &CacheConfig, id: &str) -> CacheResult<Self> {
        let name = database_name(id);
        let mut meta = MetaDatabase::open(&config.cache_dir)?;
        meta.register(&name, config.max_databases)?;
        Self::open_unregistered(&config.cache_dir, &name)
    }

    /// Open an already named database without touching the meta database.
    pub fn open_unregistered(cache_dir: &Path, name: &str) -> CacheResult<Self> {
        std::fs::create_dir_all(cache_dir)?;
        let path = database_path(cache_dir, name);
        let url = path.to_string_lossy().to_string();
        let mut conn = connect_sqlite(&url).map_err(|e| CacheError::Connection {
            path: url.clone(),
            message: format!("{e:#}"),
        })?;
        run_cache_migrations(&mut conn).map_err(|e| CacheError::Migration(format!("{e:#}")))?;
        info!(database = %name, path = %path.display(), "opened cache database");
        Ok(Self {
            name: name.to_string(),
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Database name (file stem).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the SQLite file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> MutexGuard<'_, SqliteConnection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The persisted coverage, or an empty map for a fresh database.
    pub fn load_coverage(&self) -> CacheResult<CoverageMap> {
        let mut conn = self.conn();
        let stored: Option<String> = topic_ranges::table
            .select(topic_ranges::ranges)
            .filter(topic_ranges::id.eq(1))
            .first(&mut *conn)
            .optional()?;
        let Some(json) = stored else {
            return Ok(CoverageMap::default());
        };
        let map: BTreeMap<String, Vec<Range>> = serde_json::from_str(&json)?;
        Ok(CoverageMap::from(map))
    }

    /// Persist `batch` and overwrite the coverage document in one immediate
    /// transaction. Re-writing an existing key replaces the row.
    pub fn put_batch(&self, batch: &[StoredMessage], coverage: &CoverageMap) -> CacheResult<()> {
        let json = serde_json::to_string(coverage)?;
        let mut conn = self.conn();
        conn.immediate_transaction::<_, CacheError, _>(|conn| {
            for row in batch {
                diesel::replace_into(messages::table)
                    .values(row)
                    .execute(conn)?;
            }
            diesel::replace_into(topic_ranges::table)
                .values((topic_ranges::id.eq(1), topic_ranges::ranges.eq(&json)))
                .execute(conn)?;
            Ok(())
        })?;
        debug!(database = %self.name, messages = batch.len(), "committed batch");
        Ok(())
    }

    /// Persist `batch` alone in one immediate transaction.
    ///
    /// Messages written without a matching coverage update are never served.
    pub fn put_messages(&self, batch: &[StoredMessage]) -> CacheResult<()> {
        let mut conn = self.conn();
        conn.immediate_transaction::<_, CacheError, _>(|conn| {
            for row in batch {
                diesel::replace_into(messages::table)
                    .values(row)
                    .execute(conn)?;
            }
            Ok(())
        })
    }

    /// Overwrite the coverage document alone.
    pub fn put_coverage(&self, coverage: &CoverageMap) -> CacheResult<()> {
        self.put_batch(&[], coverage)
    }

    /// Messages on `topics` with offsets inside `range`, ordered by offset and then
    /// by fetch order.
    ///
    /// Keys are scanned first and filtered by the topic encoded in them; payloads are
    /// fetched only for the matches.
    pub fn read_range(&self, topics: &BTreeSet<String>, range: Range) -> CacheResult<Vec<StoredMessage>> {
        if range.is_empty() || topics.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        let rows = conn.transaction::<_, CacheError, _>(|conn| {
            let keys: Vec<String> = messages::table
                .select(messages::primary_key)
                .filter(messages::timestamp_ns.ge(range.start))
                .filter(messages::timestamp_ns.lt(range.end))
                .load(conn)?;

            let mut wanted = Vec::new();
            for raw in keys {
                let key: MessageKey = raw.parse()?;
                if topics.contains(&key.topic) {
                    wanted.push(raw);
                }
            }

            let mut rows = Vec::with_capacity(wanted.len());
            for chunk in wanted.chunks(MAX_BIND_PARAMS) {
                let mut part: Vec<StoredMessage> = messages::table
                    .select(StoredMessage::as_select())
                    .filter(messages::primary_key.eq_any(chunk))
                    .load(conn)?;
                rows.append(&mut part);
            }
            Ok(rows)
        })?;

        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let key: MessageKey = row.primary_key.parse()?;
            keyed.push(((key.timestamp_ns, key.sequence), row));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }

    /// Number of stored messages.
    pub fn message_count(&self) -> CacheResult<i64> {
        let mut conn = self.conn();
        Ok(messages::table.count().get_result(&mut *conn)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_temp() -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            cache_dir: dir.path().to_path_buf(),
            ..CacheConfig::default()
        };
        let store = CacheStore::open(&config, "rec-1").unwrap();
        (dir, store)
    }

    #[test]
    fn database_name_is_a_safe_file_stem() {
        assert_eq!(database_name("abc-1_2"), "message-cache-v1-abc-1_2");
        assert_eq!(database_name("s3://b/k.bag"), "message-cache-v1-s3___b_k_bag");
    }

    #[test]
    fn fresh_store_has_no_coverage() {
        let (_dir, store) = open_temp();
        assert!(store.load_coverage().unwrap().is_empty());
        assert_eq!(store.message_count().unwrap(), 0);
        assert!(store.path().ends_with("message-cache-v1-rec-1.sqlite"));
    }

    #[test]
    fn batch_and_coverage_commit_together() {
        let (_dir, store) = open_temp();
        let mut coverage = CoverageMap::default();
        coverage.insert("/foo", Range::new(0, 100));
        let batch = vec![
            StoredMessage::new(10, 0, "/foo", vec![1]),
            StoredMessage::new(10, 1, "/foo", vec![2]),
        ];

        store.put_batch(&batch, &coverage).unwrap();

        assert_eq!(store.load_coverage().unwrap(), coverage);
        assert_eq!(store.message_count().unwrap(), 2);
    }

    #[test]
    fn read_range_filters_topics_and_orders_by_time_then_sequence() {
        let (_dir, store) = open_temp();
        let batch = vec![
            StoredMessage::new(50, 0, "/bar", vec![0]),
            StoredMessage::new(20, 1, "/foo", vec![2]),
            StoredMessage::new(20, 0, "/foo", vec![1]),
            StoredMessage::new(99, 2, "/foo", vec![3]),
            StoredMessage::new(100, 3, "/foo", vec![4]),
        ];
        store.put_batch(&batch, &CoverageMap::default()).unwrap();

        let topics = BTreeSet::from(["/foo".to_string()]);
        let rows = store.read_range(&topics, Range::new(0, 100)).unwrap();
        let payloads: Vec<u8> = rows.iter().map(|r| r.payload[0]).collect();

        assert_eq!(payloads, vec![1, 2, 3]);
        assert!(rows.iter().all(|r| r.topic == "/foo"));
    }

    #[test]
    fn messages_without_coverage_leave_coverage_untouched() {
        let (_dir, store) = open_temp();
        let mut coverage = CoverageMap::default();
        coverage.insert("/foo", Range::new(0, 10));
        store.put_coverage(&coverage).unwrap();

        store
            .put_messages(&[StoredMessage::new(50, 0, "/foo", vec![1])])
            .unwrap();

        assert_eq!(store.load_coverage().unwrap(), coverage);
        assert_eq!(store.message_count().unwrap(), 1);
    }

    #[test]
    fn rewriting_a_key_replaces_the_row() {
        let (_dir, store) = open_temp();
        store
            .put_batch(&[StoredMessage::new(1, 0, "/foo", vec![1])], &CoverageMap::default())
            .unwrap();
        store
            .put_batch(&[StoredMessage::new(1, 0, "/foo", vec![9])], &CoverageMap::default())
            .unwrap();

        assert_eq!(store.message_count().unwrap(), 1);
    }
}
