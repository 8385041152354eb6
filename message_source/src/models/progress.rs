//! Loading progress published by caching layers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::range::Range;

/// A loaded interval expressed as fractions of the whole recording (`0.0..=1.0`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FractionRange {
    /// Start fraction.
    pub start: f64,
    /// End fraction.
    pub end: f64,
}

/// Snapshot of what has been loaded so far.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Fully loaded parts of the recording for the currently interesting topics.
    pub fully_loaded_fraction_ranges: Vec<FractionRange>,
    /// Covered nanosecond ranges per topic. Layers that cache data always set this.
    pub ns_ranges_by_topic: Option<BTreeMap<String, Vec<Range>>>,
}
