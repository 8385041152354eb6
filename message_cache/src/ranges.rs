//! Interval algebra over half-open nanosecond [`Range`]s.
//!
//! A *simplified* list is sorted by start, has no empty entries, and no two entries
//! overlap or touch. All functions here return simplified lists; the ones taking a
//! `covered` list expect it simplified too.

use message_source::models::range::Range;

/// Normalize an arbitrary list of ranges: drop empties, sort, and merge
/// overlapping or touching neighbours.
pub fn simplify(ranges: &[Range]) -> Vec<Range> {
    let mut sorted: Vec<Range> = ranges.iter().copied().filter(|r| r.start < r.end).collect();
    sorted.sort_unstable();

    let mut out: Vec<Range> = Vec::with_capacity(sorted.len());
    for r in sorted {
        match out.last_mut() {
            Some(last) if r.start <= last.end => last.end = last.end.max(r.end),
            _ => out.push(r),
        }
    }
    out
}

/// Union of two range lists, simplified.
pub fn simplify_union(a: &[Range], b: &[Range]) -> Vec<Range> {
    let mut all = Vec::with_capacity(a.len() + b.len());
    all.extend_from_slice(a);
    all.extend_from_slice(b);
    simplify(&all)
}

/// Intersection of every list in `sets`. An empty input yields an empty result.
pub fn intersect_all(sets: &[Vec<Range>]) -> Vec<Range> {
    let Some((first, rest)) = sets.split_first() else {
        return Vec::new();
    };
    rest.iter()
        .fold(simplify(first), |acc, next| intersect(&acc, &simplify(next)))
}

/// Intersection of two simplified lists.
fn intersect(a: &[Range], b: &[Range]) -> Vec<Range> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        let start = a[i].start.max(b[j].start);
        let end = a[i].end.min(b[j].end);
        if start < end {
            out.push(Range::new(start, end));
        }
        if a[i].end < b[j].end {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// The parts of `range` not covered by the simplified list `covered`, in order.
///
/// ```
/// use message_cache::ranges::missing;
/// use message_source::models::range::Range;
///
/// let gaps = missing(Range::new(0, 10), &[Range::new(2, 4), Range::new(6, 12)]);
/// assert_eq!(gaps, vec![Range::new(0, 2), Range::new(4, 6)]);
/// ```
pub fn missing(range: Range, covered: &[Range]) -> Vec<Range> {
    let mut out = Vec::new();
    if range.is_empty() {
        return out;
    }
    let mut cursor = range.start;
    for r in covered.iter().filter(|r| r.start < r.end) {
        if r.end <= cursor {
            continue;
        }
        if r.start >= range.end {
            break;
        }
        if r.start > cursor {
            out.push(Range::new(cursor, r.start));
        }
        cursor = r.end;
        if cursor >= range.end {
            return out;
        }
    }
    out.push(Range::new(cursor, range.end));
    out
}

/// Whether `covered` contains all of `range`. Empty ranges are always covered.
pub fn is_covered(range: Range, covered: &[Range]) -> bool {
    missing(range, covered).is_empty()
}

/// Whether any range in `a` shares at least one nanosecond with any range in `b`.
pub fn is_overlapping(a: &[Range], b: &[Range]) -> bool {
    a.iter().any(|x| {
        b.iter()
            .any(|y| !x.is_empty() && !y.is_empty() && x.start < y.end && y.start < x.end)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn r(start: i64, end: i64) -> Range {
        Range::new(start, end)
    }

    #[test]
    fn simplify_merges_touching_and_overlapping() {
        let out = simplify(&[r(5, 7), r(0, 2), r(2, 3), r(6, 9), r(4, 4)]);
        assert_eq!(out, vec![r(0, 3), r(5, 9)]);
    }

    #[test]
    fn union_of_disjoint_lists_stays_sorted() {
        let out = simplify_union(&[r(10, 20)], &[r(0, 5), r(30, 40)]);
        assert_eq!(out, vec![r(0, 5), r(10, 20), r(30, 40)]);
    }

    #[test]
    fn intersect_all_edge_cases() {
        assert!(intersect_all(&[]).is_empty());
        assert_eq!(intersect_all(&[vec![r(3, 4), r(0, 1)]]), vec![r(0, 1), r(3, 4)]);
        assert_eq!(
            intersect_all(&[vec![r(0, 10)], vec![r(2, 4), r(6, 20)], vec![r(3, 8)]]),
            vec![r(3, 4), r(6, 8)]
        );
        assert!(intersect_all(&[vec![r(0, 10)], vec![]]).is_empty());
    }

    #[test]
    fn missing_handles_ranges_outside_the_bounds() {
        assert_eq!(missing(r(5, 10), &[r(0, 2), r(12, 20)]), vec![r(5, 10)]);
        assert_eq!(missing(r(5, 10), &[r(0, 6), r(9, 20)]), vec![r(6, 9)]);
        assert!(missing(r(5, 10), &[r(0, 20)]).is_empty());
        assert_eq!(missing(r(0, 10), &[]), vec![r(0, 10)]);
    }

    #[test]
    fn empty_range_is_always_covered() {
        assert!(is_covered(r(7, 7), &[]));
        assert!(missing(r(7, 7), &[r(0, 1)]).is_empty());
    }

    #[test]
    fn overlap_ignores_touching_ranges() {
        assert!(!is_overlapping(&[r(0, 5)], &[r(5, 10)]));
        assert!(is_overlapping(&[r(0, 6)], &[r(5, 10)]));
        assert!(!is_overlapping(&[], &[r(5, 10)]));
    }

    fn arb_ranges() -> impl Strategy<Value = Vec<Range>> {
        prop::collection::vec((0i64..200, 0i64..40), 0..12)
            .prop_map(|v| v.into_iter().map(|(s, len)| Range::new(s, s + len)).collect())
    }

    fn is_simplified(list: &[Range]) -> bool {
        list.iter().all(|x| !x.is_empty()) && list.windows(2).all(|w| w[0].end < w[1].start)
    }

    fn contains_point(list: &[Range], p: i64) -> bool {
        list.iter().any(|x| x.contains(p))
    }

    proptest! {
        #[test]
        fn union_is_simplified_and_preserves_points(a in arb_ranges(), b in arb_ranges()) {
            let u = simplify_union(&a, &b);
            prop_assert!(is_simplified(&u));
            for p in 0..240 {
                prop_assert_eq!(
                    contains_point(&u, p),
                    contains_point(&a, p) || contains_point(&b, p)
                );
            }
        }

        #[test]
        fn missing_and_covered_partition_the_range(
            start in 0i64..200,
            len in 0i64..60,
            covered in arb_ranges(),
        ) {
            let range = Range::new(start, start + len);
            let covered = simplify(&covered);
            let gaps = missing(range, &covered);
            prop_assert!(is_simplified(&gaps));
            for p in range.start..range.end {
                prop_assert_eq!(contains_point(&gaps, p), !contains_point(&covered, p));
            }
            prop_assert!(gaps.iter().all(|g| g.start >= range.start && g.end <= range.end));
            prop_assert!(is_covered(range, &simplify_union(&covered, &gaps)));
        }

        #[test]
        fn intersection_keeps_common_points(a in arb_ranges(), b in arb_ranges()) {
            let i = intersect_all(&[a.clone(), b.clone()]);
            prop_assert!(is_simplified(&i));
            for p in 0..240 {
                prop_assert_eq!(
                    contains_point(&i, p),
                    contains_point(&a, p) && contains_point(&b, p)
                );
            }
        }
    }
}
