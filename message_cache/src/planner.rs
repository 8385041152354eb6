//! Decides which range, if any, the next upstream connection should cover.
//!
//! Priorities, highest first:
//! 1. The oldest pending read request's first gap.
//! 2. Read-ahead after the last resolved request, bounded by the cache capacity.
//! 3. With unbounded capacity, everything else in the recording.

use message_source::models::range::Range;

use crate::ranges::{is_covered, is_overlapping, missing};

/// Snapshot of the writer state the planner looks at.
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    /// Remaining range of the running connection, if any.
    pub current_remaining: Option<Range>,
    /// Range of the oldest pending read request, if any.
    pub read_request_range: Option<Range>,
    /// Coverage for the current topic set.
    pub downloaded: &'a [Range],
    /// End of the most recently resolved read request.
    pub last_resolved_end: Option<i64>,
    /// Read-ahead bound; `None` means the whole recording may be cached.
    pub cache_capacity: Option<i64>,
    /// Length of the recording in nanoseconds.
    pub total_size: i64,
    /// A running connection starting this far before a request's first gap is kept.
    pub prefetch_threshold: i64,
}

impl PlanInput<'_> {
    fn capacity(&self) -> Option<i64> {
        self.cache_capacity.filter(|c| *c < self.total_size)
    }
}

/// Range for a new connection, or `None` to keep the current one (or stay idle).
///
/// # Panics
///
/// When the pending request is already fully downloaded or longer than the cache
/// capacity; the writer resolves and rejects those before planning.
pub fn plan(input: &PlanInput<'_>) -> Option<Range> {
    match (input.read_request_range, input.current_remaining) {
        (Some(request), current) => plan_for_request(input, request, current),
        (None, None) => plan_read_ahead(input),
        (None, Some(_)) => None,
    }
}

fn plan_for_request(input: &PlanInput<'_>, request: Range, current: Option<Range>) -> Option<Range> {
    if let Some(capacity) = input.cache_capacity {
        assert!(
            request.len() <= capacity,
            "read request {request} is longer than the cache capacity {capacity}"
        );
    }
    let gaps = missing(request, input.downloaded);
    let first_gap = *gaps
        .first()
        .unwrap_or_else(|| panic!("read request {request} is already downloaded"));

    let start_new = match current {
        None => true,
        Some(current) => {
            !is_overlapping(&gaps, &[current])
                || current.start > first_gap.start
                || current.start.saturating_add(input.prefetch_threshold) < first_gap.start
        }
    };
    if !start_new {
        return None;
    }

    match input.capacity() {
        None => missing(Range::new(first_gap.start, input.total_size), input.downloaded)
            .first()
            .copied(),
        Some(capacity) if first_gap.end == request.end => Some(Range::new(
            first_gap.start,
            request
                .start
                .saturating_add(capacity)
                .min(input.total_size)
                .max(first_gap.end),
        )),
        Some(_) => Some(first_gap),
    }
}

fn plan_read_ahead(input: &PlanInput<'_>) -> Option<Range> {
    let read_ahead = match input.capacity() {
        None => {
            let after = Range::new(input.last_resolved_end.unwrap_or(0), input.total_size);
            if is_covered(after, input.downloaded) {
                Range::new(0, input.total_size)
            } else {
                after
            }
        }
        Some(capacity) => {
            let end = input.last_resolved_end?;
            Range::new(end, end.saturating_add(capacity).min(input.total_size))
        }
    };
    missing(read_ahead, input.downloaded).first().copied()
}
