//! Range-list merge engine.
//!
//! Folds two sorted extent lists into their sorted, coalesced union. Extents
//! that overlap or touch (`end(x) >= start(y)`) are fused into one extent
//! spanning both. The output of a merge is always a valid union list: sorted
//! ascending by offset, no zero-length entries, and no two entries
//! overlapping or adjacent.

use crate::range::Extent;

/// Merge two sorted extent lists into `dest`, returning the entry count.
///
/// Both inputs must be sorted ascending by offset. Entries within an input
/// may touch each other; they are fused like entries from different inputs.
/// `dest` is cleared first. The output never holds more than
/// `a.len() + b.len()` entries, so reserving that much capacity up front
/// means the merge performs no allocation.
///
/// When both heads start at the same offset either may be taken first; the
/// fused result is the same.
pub fn merge_into(a: &[Extent], b: &[Extent], dest: &mut Vec<Extent>) -> usize {
    dest.clear();

    let (mut i, mut j) = (0, 0);
    loop {
        let next = match (a.get(i), b.get(j)) {
            (Some(x), Some(y)) => {
                if x.offset <= y.offset {
                    i += 1;
                    *x
                } else {
                    j += 1;
                    *y
                }
            }
            (Some(x), None) => {
                i += 1;
                *x
            }
            (None, Some(y)) => {
                j += 1;
                *y
            }
            (None, None) => break,
        };

        push_fused(dest, next);
    }

    dest.len()
}

/// Merge two sorted extent lists into a freshly allocated union list.
pub fn merge(a: &[Extent], b: &[Extent]) -> Vec<Extent> {
    let mut dest = Vec::with_capacity(a.len() + b.len());
    merge_into(a, b, &mut dest);
    dest
}

/// Append `next` to `dest`, extending the last entry instead when the two
/// touch.
///
/// Extents are clamped so that `offset + length` never exceeds `u64::MAX`.
fn push_fused(dest: &mut Vec<Extent>, next: Extent) {
    let next = Extent::new(next.offset, next.length.min(u64::MAX - next.offset));
    if next.length == 0 {
        return;
    }

    if let Some(last) = dest.last_mut() {
        if next.offset <= last.end() {
            let end = last.end().max(next.end());
            last.length = end - last.offset;
            return;
        }
    }

    dest.push(next);
}

/// Check that `list` is a valid union list: sorted, no empty entries, and
/// no overlapping or adjacent neighbours.
pub fn is_coalesced(list: &[Extent]) -> bool {
    list.iter().all(|e| e.length > 0) && list.windows(2).all(|w| w[0].end() < w[1].offset)
}

/// Total bytes covered by a coalesced list.
pub fn covered_bytes(list: &[Extent]) -> u64 {
    list.iter().map(|e| e.length).sum()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn extents(pairs: &[(u64, u64)]) -> Vec<Extent> {
        pairs.iter().copied().map(Extent::from).collect()
    }

    #[test]
    fn test_merge_disjoint() {
        let a = extents(&[(100, 50)]);
        let b = extents(&[(200, 50)]);
        assert_eq!(merge(&a, &b), extents(&[(100, 50), (200, 50)]));
    }

    #[test]
    fn test_merge_overlap_fuses() {
        let a = extents(&[(100, 100)]);
        let b = extents(&[(150, 100)]);
        assert_eq!(merge(&a, &b), extents(&[(100, 150)]));
    }

    #[test]
    fn test_merge_touching_fuses() {
        let a = extents(&[(0, 100)]);
        let b = extents(&[(100, 20)]);
        assert_eq!(merge(&a, &b), extents(&[(0, 120)]));
    }

    #[test]
    fn test_merge_contained() {
        // b lies entirely inside a, end must not shrink
        let a = extents(&[(0, 1000)]);
        let b = extents(&[(10, 10)]);
        assert_eq!(merge(&a, &b), extents(&[(0, 1000)]));
        assert_eq!(merge(&b, &a), extents(&[(0, 1000)]));
    }

    #[test]
    fn test_merge_bridges_chain() {
        // One long extent in b swallows several entries of a
        let a = extents(&[(0, 10), (20, 10), (40, 10), (100, 5)]);
        let b = extents(&[(5, 40)]);
        assert_eq!(merge(&a, &b), extents(&[(0, 50), (100, 5)]));
    }

    #[test]
    fn test_merge_empty_inputs() {
        let a = extents(&[(10, 10), (30, 10)]);
        assert_eq!(merge(&a, &[]), a);
        assert_eq!(merge(&[], &a), a);
        assert!(merge(&[], &[]).is_empty());
    }

    #[test]
    fn test_merge_equal_starts() {
        let a = extents(&[(50, 10)]);
        let b = extents(&[(50, 30)]);
        assert_eq!(merge(&a, &b), extents(&[(50, 30)]));
        assert_eq!(merge(&b, &a), extents(&[(50, 30)]));
    }

    #[test]
    fn test_merge_into_reuses_capacity() {
        let a = extents(&[(0, 10), (50, 10)]);
        let b = extents(&[(20, 10), (80, 10)]);
        let mut dest = Vec::with_capacity(a.len() + b.len());
        dest.push(Extent::new(999, 1)); // stale contents are discarded
        let ptr = dest.as_ptr();

        let count = merge_into(&a, &b, &mut dest);

        assert_eq!(count, 4);
        assert_eq!(dest.as_ptr(), ptr);
        assert_eq!(dest, extents(&[(0, 10), (20, 10), (50, 10), (80, 10)]));
    }

    #[test]
    fn test_merge_skips_empty_extents() {
        let a = extents(&[(10, 0), (20, 5)]);
        assert_eq!(merge(&a, &[]), extents(&[(20, 5)]));
    }

    #[test]
    fn test_merge_clamps_at_address_space_end() {
        let a = extents(&[(u64::MAX - 10, 100)]);
        let merged = merge(&a, &[]);
        assert_eq!(merged, extents(&[(u64::MAX - 10, 10)]));
        assert_eq!(merged[0].offset + merged[0].length, u64::MAX);

        // Fusing with a neighbour also stays in range
        let b = extents(&[(u64::MAX - 20, 15)]);
        assert_eq!(merge(&a, &b), extents(&[(u64::MAX - 20, 20)]));
    }

    #[test]
    fn test_is_coalesced() {
        assert!(is_coalesced(&[]));
        assert!(is_coalesced(&extents(&[(0, 10), (11, 5)])));
        assert!(!is_coalesced(&extents(&[(0, 10), (10, 5)])));
        assert!(!is_coalesced(&extents(&[(20, 10), (0, 5)])));
        assert!(!is_coalesced(&extents(&[(0, 0)])));
    }

    #[test]
    fn test_covered_bytes() {
        assert_eq!(covered_bytes(&extents(&[(0, 10), (20, 5)])), 15);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        /// Generate a sorted, internally non-overlapping extent list. Entries
        /// may touch (gap of zero), as raw allocation lists can.
        fn sorted_extents() -> impl Strategy<Value = Vec<Extent>> {
            prop::collection::vec((0u64..64, 1u64..64), 0..24).prop_map(|pairs| {
                let mut pos = 0u64;
                pairs
                    .into_iter()
                    .map(|(gap, len)| {
                        let e = Extent::new(pos + gap, len);
                        pos = e.end();
                        e
                    })
                    .collect()
            })
        }

        /// Byte-level coverage map of a list of extents.
        fn coverage(lists: &[&[Extent]]) -> Vec<bool> {
            let max_end = lists
                .iter()
                .flat_map(|l| l.iter())
                .map(Extent::end)
                .max()
                .unwrap_or(0);
            let mut map = vec![false; max_end as usize];
            for e in lists.iter().flat_map(|l| l.iter()) {
                for byte in e.offset..e.end() {
                    map[byte as usize] = true;
                }
            }
            map
        }

        proptest! {
            #[test]
            fn merge_is_exact_union(a in sorted_extents(), b in sorted_extents()) {
                let merged = merge(&a, &b);

                prop_assert!(is_coalesced(&merged));
                prop_assert!(merged.len() <= a.len() + b.len());

                let expected = coverage(&[&a, &b]);
                let actual = coverage(&[&merged]);
                prop_assert_eq!(actual, expected.clone());
                let measure = expected.iter().filter(|&&set| set).count() as u64;
                prop_assert_eq!(covered_bytes(&merged), measure);
            }

            #[test]
            fn merge_is_commutative(a in sorted_extents(), b in sorted_extents()) {
                prop_assert_eq!(merge(&a, &b), merge(&b, &a));
            }

            #[test]
            fn merge_with_self_is_identity(a in sorted_extents()) {
                let once = merge(&a, &[]);
                prop_assert_eq!(merge(&once, &once), once);
            }
        }
    }
}
