use thiserror::Error;

/// The unified error type crossing the [`MessageSource`](crate::MessageSource) boundary.
#[derive(Debug, Error)]
pub enum Error {
    /// An error originating from a concrete source (e.g. a broken recording).
    #[error("Provider error: {0}")]
    Provider(String),

    /// An error related to configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A generic I/O error.
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    /// A recording line or stored document could not be decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The source was used before `initialize` or after `close`.
    #[error("Source is closed")]
    Closed,

    /// The recording spans more nanoseconds than offsets can safely represent.
    #[error("Time range is too long to be supported: {total_ns} ns")]
    TimeRangeTooLong {
        /// Length of the recording in nanoseconds, if it could be computed at all.
        total_ns: i128,
    },

    /// A timestamp could not be converted to or from a nanosecond offset.
    #[error("Timestamp {0} cannot be represented as a nanosecond offset")]
    TimeOverflow(String),

    /// A read request is longer than the configured cache capacity.
    #[error("Requested range of {requested_ns} ns exceeds cache capacity of {capacity_ns} ns")]
    RangeExceedsCapacity {
        /// Length of the request.
        requested_ns: i64,
        /// Configured capacity.
        capacity_ns: i64,
    },

    /// A failure inside a caching layer (store, migrations, coverage).
    #[error("Cache error: {0}")]
    Cache(String),
}
