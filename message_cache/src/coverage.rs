//! Per-topic coverage: which nanosecond ranges of each topic are fully persisted.

use std::collections::BTreeMap;
use std::fmt;

use message_source::models::range::Range;
use serde::{Deserialize, Serialize};

use crate::ranges::{intersect_all, simplify, simplify_union};

/// Map from topic to the simplified list of ranges whose messages are all stored.
///
/// Serialized as a plain JSON object, which is also the on-disk format of the
/// `topic_ranges` row:
///
/// ```
/// use message_cache::CoverageMap;
/// use message_source::models::range::Range;
///
/// let mut coverage = CoverageMap::default();
/// coverage.insert("/foo", Range::new(0, 100));
/// assert_eq!(
///     serde_json::to_string(&coverage).unwrap(),
///     r#"{"/foo":[{"start":0,"end":100}]}"#
/// );
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverageMap(BTreeMap<String, Vec<Range>>);

impl CoverageMap {
    /// Ranges covered for `topic`; empty for unknown topics.
    pub fn get(&self, topic: &str) -> &[Range] {
        self.0.get(topic).map(Vec::as_slice).unwrap_or_default()
    }

    /// Mark `range` as covered for `topic`, keeping the list simplified.
    pub fn insert(&mut self, topic: impl Into<String>, range: Range) {
        if range.is_empty() {
            return;
        }
        let entry = self.0.entry(topic.into()).or_default();
        *entry = simplify_union(entry, &[range]);
    }

    /// Ranges covered for *every* topic in `topics`. Empty when `topics` is empty.
    pub fn downloaded<S: AsRef<str>>(&self, topics: &[S]) -> Vec<Range> {
        let sets: Vec<Vec<Range>> = topics.iter().map(|t| self.get(t.as_ref()).to_vec()).collect();
        intersect_all(&sets)
    }

    /// Topics with at least one covered range.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// True when nothing has been covered yet.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every range of `other` is also covered here.
    pub fn includes(&self, other: &CoverageMap) -> bool {
        other.0.iter().all(|(topic, ranges)| {
            ranges
                .iter()
                .all(|r| crate::ranges::is_covered(*r, self.get(topic)))
        })
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &BTreeMap<String, Vec<Range>> {
        &self.0
    }
}

impl From<BTreeMap<String, Vec<Range>>> for CoverageMap {
    /// Normalizes every list, so maps read from disk or from another layer are
    /// always simplified.
    fn from(map: BTreeMap<String, Vec<Range>>) -> Self {
        Self(
            map.into_iter()
                .map(|(topic, ranges)| (topic, simplify(&ranges)))
                .filter(|(_, ranges)| !ranges.is_empty())
                .collect(),
        )
    }
}

impl fmt::Display for CoverageMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return writeln!(f, "(no coverage)");
        }
        for (topic, ranges) in &self.0 {
            let rendered: Vec<String> = ranges.iter().map(Range::to_string).collect();
            writeln!(f, "{topic}: {}", rendered.join(", "))?;
        }
        Ok(())
    }
}
