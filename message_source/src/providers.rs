//! Source abstraction shared by every layer of the cache stack.
//!
//! This module defines the [`MessageSource`] trait. An upstream recording implements
//! it, and so does every caching layer stacked on top, so callers can compose
//! `reader -> writer -> upstream` without knowing which layer they talk to.
//!
//! The trait is designed for async usage and supports dynamic dispatch
//! (`Arc<dyn MessageSource>`) for runtime selection of sources.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use chrono::{DateTime, Utc};
//! use message_source::{
//!     Error, MessageSource, ProgressCallback,
//!     models::{initialization::Initialization, message::RawMessage},
//! };
//!
//! struct Silent(Initialization);
//!
//! #[async_trait]
//! impl MessageSource for Silent {
//!     async fn initialize(&self, _progress: ProgressCallback) -> Result<Initialization, Error> {
//!         Ok(self.0.clone())
//!     }
//!
//!     async fn get_messages(
//!         &self,
//!         _start: DateTime<Utc>,
//!         _end: DateTime<Utc>,
//!         _topics: &[String],
//!     ) -> Result<Vec<RawMessage>, Error> {
//!         Ok(vec![])
//!     }
//!
//!     async fn close(&self) -> Result<(), Error> {
//!         Ok(())
//!     }
//! }
//! ```

pub mod jsonl;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    errors::Error,
    models::{initialization::Initialization, message::RawMessage, progress::Progress},
};

/// Callback through which a layer pushes loading progress to the layer above it.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// A progress callback that discards every update.
pub fn ignore_progress() -> ProgressCallback {
    Arc::new(|_| {})
}

/// Random access to an immutable, time-indexed stream of messages.
///
/// Implementations must be deterministic: two calls with the same arguments return
/// the same messages. Caching layers rely on this to retry safely.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Prepares the source and reports the recording bounds and topics.
    ///
    /// `progress` receives loading updates for as long as the source is open.
    async fn initialize(&self, progress: ProgressCallback) -> Result<Initialization, Error>;

    /// Returns every message on `topics` received in `[start, end]` (both inclusive),
    /// in ascending receive-time order.
    async fn get_messages(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        topics: &[String],
    ) -> Result<Vec<RawMessage>, Error>;

    /// Releases resources held by this source and the sources beneath it.
    async fn close(&self) -> Result<(), Error>;
}
