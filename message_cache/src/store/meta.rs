//! The shared meta database: which cache databases exist and how recently each was
//! opened. Opening a new database evicts the least recently used ones beyond the
//! configured limit.

use std::io;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use diesel::prelude::*;
use tracing::{error, info, warn};

use crate::db::{connection::connect_sqlite, migrate::run_meta_migrations};
use crate::error::{CacheError, CacheResult};
use crate::models::DatabaseEntry;
use crate::schema::databases::dsl as db;

/// File name of the meta database inside the cache directory.
pub const META_DB_FILE: &str = "message-cache-meta.sqlite";

/// Handle on `{cache_dir}/message-cache-meta.sqlite`.
pub struct MetaDatabase {
    dir: PathBuf,
    conn: SqliteConnection,
}

impl MetaDatabase {
    /// Open (creating if needed) the meta database in `cache_dir`.
    pub fn open(cache_dir: &Path) -> CacheResult<Self> {
        std::fs::create_dir_all(cache_dir)?;
        let path = cache_dir.join(META_DB_FILE);
        let url = path.to_string_lossy().to_string();
        let mut conn = connect_sqlite(&url).map_err(|e| CacheError::Connection {
            path: url.clone(),
            message: format!("{e:#}"),
        })?;
        run_meta_migrations(&mut conn).map_err(|e| CacheError::Migration(format!("{e:#}")))?;
        Ok(Self {
            dir: cache_dir.to_path_buf(),
            conn,
        })
    }

    /// Record that `name` was just opened and evict the oldest databases so that at
    /// most `max_databases` remain. Returns the names that were deleted.
    ///
    /// A database whose files cannot be removed keeps its row and is retried on the
    /// next call.
    pub fn register(&mut self, name: &str, max_databases: usize) -> CacheResult<Vec<String>> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let stale = self.conn.immediate_transaction::<_, CacheError, _>(|conn| {
            let last_seq: Option<i64> = db::databases
                .select(diesel::dsl::max(db::access_seq))
                .first(conn)?;
            let entry = DatabaseEntry {
                name: name.to_string(),
                last_access: now.clone(),
                access_seq: last_seq.unwrap_or(0) + 1,
            };
            diesel::replace_into(db::databases)
                .values(&entry)
                .execute(conn)?;

            let names: Vec<String> = db::databases
                .select(db::name)
                .order(db::access_seq.desc())
                .load(conn)?;
            Ok(names.into_iter().skip(max_databases.max(1)).collect::<Vec<_>>())
        })?;

        let mut evicted = Vec::new();
        for old in stale {
            if !delete_database_files(&self.dir, &old) {
                continue;
            }
            diesel::delete(db::databases.filter(db::name.eq(&old))).execute(&mut self.conn)?;
            info!(database = %old, "evicted least recently used cache database");
            evicted.push(old);
        }
        Ok(evicted)
    }

    /// Whether `name` is registered.
    pub fn contains(&mut self, name: &str) -> CacheResult<bool> {
        let count: i64 = db::databases
            .filter(db::name.eq(name))
            .count()
            .get_result(&mut self.conn)?;
        Ok(count > 0)
    }

    /// Registered databases, most recently opened first.
    pub fn list(&mut self) -> CacheResult<Vec<DatabaseEntry>> {
        Ok(db::databases
            .select(DatabaseEntry::as_select())
            .order(db::access_seq.desc())
            .load(&mut self.conn)?)
    }
}

/// Path of the SQLite file for the database called `name`.
pub fn database_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.sqlite"))
}

/// Remove a database file and its WAL sidecars. Files that are already gone count
/// as removed.
fn delete_database_files(dir: &Path, name: &str) -> bool {
    let main = database_path(dir, name);
    let mut paths = vec![main.clone()];
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = main.clone().into_os_string();
        sidecar.push(suffix);
        paths.push(PathBuf::from(sidecar));
    }

    for path in paths {
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!(database = %name, path = %path.display(), error = %e, "cache database is in use; deferring eviction");
                return false;
            }
            Err(e) => {
                error!(database = %name, path = %path.display(), error = %e, "failed to delete cache database");
                return false;
            }
        }
    }
    true
}
