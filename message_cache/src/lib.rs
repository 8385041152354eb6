//! Random-access, time-ranged message cache backed by SQLite.
//!
//! A [`reader::CacheReader`] serves arbitrary `[start, end]` requests for a set of
//! topics from a local database, while a [`writer::CacheWriter`] underneath it
//! downloads the missing parts from an upstream
//! [`MessageSource`](message_source::MessageSource) in small blocks, persisting each
//! block together with the per-topic coverage in a single transaction.
//!
//! ```text
//! caller -> CacheReader --(signal)--> CacheWriter --(fetch)--> upstream
//!               |                         |
//!               +------ read ---- SQLite -+-- write (messages + coverage)
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod coverage;
pub mod db;
pub mod error;
pub mod models;
pub mod planner;
pub mod ranges;
pub mod reader;
pub mod schema;
pub mod store;
pub mod telemetry;
pub mod writer;

pub use config::CacheConfig;
pub use coverage::CoverageMap;
pub use error::{CacheError, CacheResult};
pub use reader::CacheReader;
pub use store::CacheStore;
pub use writer::CacheWriter;
