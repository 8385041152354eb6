//! Conversions between wall-clock timestamps and nanosecond offsets.
//!
//! Offsets are measured from the start of the recording. Every conversion is
//! checked: a value that does not fit an `i64` is reported as
//! [`Error::TimeOverflow`] instead of wrapping.

use chrono::{DateTime, Duration, Utc};

use crate::{errors::Error, models::range::Range};

/// Offsets beyond this fraction of `i64::MAX` are refused so that range arithmetic
/// (`start + block`, `end + 1`) keeps some headroom.
const MAX_TOTAL_NS: i64 = (i64::MAX / 10) * 9;

/// Nanoseconds between `start` and `t` (negative if `t` precedes `start`).
pub fn to_offset_ns(start: DateTime<Utc>, t: DateTime<Utc>) -> Result<i64, Error> {
    t.signed_duration_since(start)
        .num_nanoseconds()
        .ok_or_else(|| Error::TimeOverflow(t.to_rfc3339()))
}

/// Timestamp lying `offset_ns` nanoseconds after `start`.
pub fn from_offset_ns(start: DateTime<Utc>, offset_ns: i64) -> Result<DateTime<Utc>, Error> {
    start
        .checked_add_signed(Duration::nanoseconds(offset_ns))
        .ok_or_else(|| Error::TimeOverflow(format!("{start} + {offset_ns}ns")))
}

/// Length of an inclusive `[start, end]` recording in nanoseconds (`end - start + 1`).
///
/// Errors with [`Error::TimeRangeTooLong`] when the result leaves too little headroom.
pub fn total_ns(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<i64, Error> {
    let span = end.signed_duration_since(start);
    let total = span
        .num_nanoseconds()
        .and_then(|ns| ns.checked_add(1))
        .ok_or(Error::TimeRangeTooLong {
            total_ns: i128::from(span.num_microseconds().unwrap_or(i64::MAX)) * 1_000,
        })?;
    if total > MAX_TOTAL_NS {
        return Err(Error::TimeRangeTooLong {
            total_ns: i128::from(total),
        });
    }
    Ok(total)
}

/// Offset range for an inclusive `[start_time, end_time]` request.
///
/// `Range` is half-open, so the end offset is shifted by one nanosecond.
pub fn request_range(
    recording_start: DateTime<Utc>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
) -> Result<Range, Error> {
    let start = to_offset_ns(recording_start, start_time)?;
    let end = to_offset_ns(recording_start, end_time)?
        .checked_add(1)
        .ok_or_else(|| Error::TimeOverflow(end_time.to_rfc3339()))?;
    Ok(Range::new(start, end))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn offsets_round_trip_with_nanosecond_precision() {
        let t = t0() + Duration::nanoseconds(1_500_000_123);
        let ns = to_offset_ns(t0(), t).unwrap();
        assert_eq!(ns, 1_500_000_123);
        assert_eq!(from_offset_ns(t0(), ns).unwrap(), t);
    }

    #[test]
    fn total_is_inclusive() {
        assert_eq!(total_ns(t0(), t0()).unwrap(), 1);
        assert_eq!(total_ns(t0(), t0() + Duration::seconds(2)).unwrap(), 2_000_000_001);
    }

    #[test]
    fn request_range_is_half_open() {
        let r = request_range(t0(), t0(), t0() + Duration::milliseconds(300)).unwrap();
        assert_eq!(r, Range::new(0, 300_000_001));
    }

    #[test]
    fn absurd_spans_are_refused() {
        let end = t0() + Duration::days(365 * 290);
        assert!(matches!(
            total_ns(t0(), end),
            Err(Error::TimeRangeTooLong { .. })
        ));
    }
}
