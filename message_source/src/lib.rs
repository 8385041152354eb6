//! Upstream side of the message cache.
//!
//! Defines the [`MessageSource`](providers::MessageSource) contract shared by every
//! layer of the cache stack, the vendor-neutral models that flow through it, and a
//! couple of concrete sources (in-memory and JSON-lines recordings).

pub mod errors;
pub mod models;
pub mod providers;

pub use errors::Error;
pub use providers::{MessageSource, ProgressCallback};
