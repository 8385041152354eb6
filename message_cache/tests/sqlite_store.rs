use std::collections::BTreeSet;

use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{Integer, Text};
use message_cache::config::CacheConfig;
use message_cache::models::StoredMessage;
use message_cache::store::{CacheStore, database_name, meta::MetaDatabase};
use message_cache::{CacheError, CoverageMap, db::connection::connect_sqlite};
use message_source::models::range::Range;
use tempfile::TempDir;

#[derive(QueryableByName)]
struct JournalMode {
    #[diesel(sql_type = Text)]
    journal_mode: String,
}

#[derive(QueryableByName)]
struct BusyTimeout {
    #[diesel(sql_type = Integer, column_name = "timeout")]
    busy_timeout: i32,
}

fn config(dir: &TempDir, max_databases: usize) -> CacheConfig {
    CacheConfig {
        cache_dir: dir.path().to_path_buf(),
        max_databases,
        ..CacheConfig::default()
    }
}

#[test]
fn connection_applies_pragmas() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::open(&config(&dir, 3), "pragmas").unwrap();

    let mut conn = connect_sqlite(&store.path().to_string_lossy()).unwrap();
    let jm: JournalMode = sql_query("PRAGMA journal_mode;").get_result(&mut conn).unwrap();
    assert_eq!(jm.journal_mode.to_lowercase(), "wal");
    let bt: BusyTimeout = sql_query("PRAGMA busy_timeout;").get_result(&mut conn).unwrap();
    assert_eq!(bt.busy_timeout, 5000);
}

#[test]
fn two_handles_see_each_others_commits() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, 3);
    let writer = CacheStore::open(&cfg, "shared").unwrap();
    let reader = CacheStore::open(&cfg, "shared").unwrap();

    let mut coverage = CoverageMap::default();
    coverage.insert("/foo", Range::new(0, 10));
    writer
        .put_batch(&[StoredMessage::new(3, 0, "/foo", b"hi".to_vec())], &coverage)
        .unwrap();

    assert_eq!(reader.load_coverage().unwrap(), coverage);
    let rows = reader
        .read_range(&BTreeSet::from(["/foo".to_string()]), Range::new(0, 10))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].payload, b"hi");
}

#[test]
fn opening_more_databases_than_allowed_evicts_the_oldest() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, 2);

    for id in ["one", "two", "three"] {
        let store = CacheStore::open(&cfg, id).unwrap();
        store.put_coverage(&CoverageMap::default()).unwrap();
    }

    let mut meta = MetaDatabase::open(dir.path()).unwrap();
    let names: Vec<String> = meta.list().unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec![database_name("three"), database_name("two")]);
    assert!(!dir.path().join(format!("{}.sqlite", database_name("one"))).exists());
    assert!(dir.path().join(format!("{}.sqlite", database_name("two"))).exists());
}

#[test]
fn reopening_refreshes_recency() {
    let dir = TempDir::new().unwrap();
    let cfg = config(&dir, 2);

    CacheStore::open(&cfg, "one").unwrap();
    CacheStore::open(&cfg, "two").unwrap();
    CacheStore::open(&cfg, "one").unwrap();
    CacheStore::open(&cfg, "three").unwrap();

    let mut meta = MetaDatabase::open(dir.path()).unwrap();
    assert!(meta.contains(&database_name("one")).unwrap());
    assert!(!meta.contains(&database_name("two")).unwrap());
}

#[test]
fn corrupt_coverage_document_is_reported() {
    let dir = TempDir::new().unwrap();
    let store = CacheStore::open(&config(&dir, 3), "corrupt").unwrap();

    let mut conn = connect_sqlite(&store.path().to_string_lossy()).unwrap();
    sql_query("INSERT INTO topic_ranges (id, ranges) VALUES (1, 'not json')")
        .execute(&mut conn)
        .unwrap();

    assert!(matches!(store.load_coverage(), Err(CacheError::Coverage(_))));
}
