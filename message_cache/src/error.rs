//! Error type for the caching layers.
//!
//! Store, migration and configuration failures are [`CacheError`]s. At the
//! [`MessageSource`](message_source::MessageSource) boundary they are folded into
//! [`message_source::Error::Cache`] so that the stacked layers share one error type.

use thiserror::Error;

/// Errors raised by the cache store, its configuration and the caching layers.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A query or transaction failed.
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// A database file could not be opened.
    #[error("failed to open database {path}: {message}")]
    Connection {
        /// Path of the database file.
        path: String,
        /// Rendered cause chain.
        message: String,
    },

    /// Embedded migrations could not be applied.
    #[error("migration failed: {0}")]
    Migration(String),

    /// The stored coverage document could not be (de)serialized.
    #[error("coverage document is corrupt: {0}")]
    Coverage(#[from] serde_json::Error),

    /// File system failure (cache directory, database deletion).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored primary key does not follow `"{timestamp}|||{sequence}|||{topic}"`.
    #[error("invalid message key {0:?}")]
    InvalidKey(String),

    /// Configuration could not be parsed or failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A caching layer was used before `initialize` completed.
    #[error("cache layer used before initialize")]
    NotInitialized,

    /// A blocking database task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Error reported by the source beneath the cache.
    #[error(transparent)]
    Source(#[from] message_source::Error),
}

/// Result alias used throughout the crate.
pub type CacheResult<T> = Result<T, CacheError>;

impl From<CacheError> for message_source::Error {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Source(inner) => inner,
            other => message_source::Error::Cache(other.to_string()),
        }
    }
}
