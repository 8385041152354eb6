//! Database utilities for connections and schema migrations.
//!
//! - [`connection::connect_sqlite`] opens a file and applies WAL, foreign_keys=ON and a
//!   5000ms busy_timeout.
//! - [`migrate::run_cache_migrations`] and [`migrate::run_meta_migrations`] apply the
//!   embedded schemas for a per-recording cache database and the shared meta database.
//!
//! ```no_run
//! use message_cache::db::{connection, migrate};
//!
//! let path = std::env::temp_dir().join("message_cache_example.sqlite");
//! let mut conn = connection::connect_sqlite(path.to_str().unwrap()).expect("connect");
//! migrate::run_cache_migrations(&mut conn).expect("migrations");
//! ```

pub mod connection;
pub mod migrate;
