//! Half-open nanosecond ranges.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A half-open interval `[start, end)` of nanosecond offsets since the start of a recording.
///
/// `start <= end` always holds; [`Range::new`] clamps inverted input to an empty range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Range {
    /// Inclusive start offset (ns).
    pub start: i64,
    /// Exclusive end offset (ns).
    pub end: i64,
}

impl Range {
    /// Create a range. An `end` before `start` yields the empty range at `start`.
    pub const fn new(start: i64, end: i64) -> Self {
        if end < start {
            Self { start, end: start }
        } else {
            Self { start, end }
        }
    }

    /// Number of nanoseconds covered.
    pub const fn len(&self) -> i64 {
        self.end - self.start
    }

    /// True for zero-length ranges.
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True if `offset` falls inside the range.
    pub const fn contains(&self, offset: i64) -> bool {
        self.start <= offset && offset < self.end
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
