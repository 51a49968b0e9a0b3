// src/ranges.rs

//! Disjoint u32 interval sets for subordinate UID/GID bookkeeping.
//!
//! `RemapUid=`/`RemapGid=` values arrive as administrator-supplied,
//! possibly overlapping ranges; merging them through [`Ranges`] produces
//! the same result regardless of insertion order. The list is kept
//! sorted, pairwise disjoint, and non-adjacent at all times.

/// A half-open-by-length interval `[start, start+length)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: u32,
    pub length: u32,
}

/// Sorted list of disjoint, non-adjacent ranges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ranges {
    ranges: Vec<Range>,
}

/// Clamp so that `start + length` never overflows u32
fn clamp_length(start: u32, length: u32) -> u32 {
    length.min(u32::MAX - start)
}

impl Ranges {
    pub fn new(start: u32, length: u32) -> Ranges {
        let mut ranges = Ranges::default();
        ranges.add(start, length);
        ranges
    }

    pub fn empty() -> Ranges {
        Ranges::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    /// Total number of ids covered
    pub fn length(&self) -> u32 {
        self.ranges.iter().map(|r| r.length).sum()
    }

    /// Insert `[start, start+length)`, merging with any overlapping or
    /// adjacent ranges
    pub fn add(&mut self, start: u32, length: u32) {
        if start == u32::MAX {
            return;
        }
        let length = clamp_length(start, length);
        if length == 0 {
            return;
        }
        let end = start + length;

        for i in 0..self.ranges.len() {
            let current = self.ranges[i];
            let current_end = current.start + current.length;

            // Entirely before this range, not even adjacent: splice in
            if end < current.start {
                self.ranges.insert(i, Range { start, length });
                return;
            }

            // Overlaps or touches this range: extend it, then cascade
            // over any following ranges the extension now reaches
            if start <= current_end {
                let new_start = start.min(current.start);
                let mut new_end = end.max(current_end);

                while i + 1 < self.ranges.len() {
                    let next = self.ranges[i + 1];
                    if new_end < next.start {
                        break;
                    }
                    new_end = new_end.max(next.start + next.length);
                    self.ranges.remove(i + 1);
                }

                self.ranges[i] = Range {
                    start: new_start,
                    length: new_end - new_start,
                };
                return;
            }
        }

        self.ranges.push(Range { start, length });
    }

    /// Remove `[start, start+length)` from the set
    pub fn remove(&mut self, start: u32, length: u32) {
        if start == u32::MAX {
            return;
        }
        let length = clamp_length(start, length);
        if length == 0 {
            return;
        }
        let end = start + length;

        let mut i = 0;
        while i < self.ranges.len() {
            let current = self.ranges[i];
            let current_end = current.start + current.length;

            if end <= current.start {
                break;
            }
            if start >= current_end {
                i += 1;
                continue;
            }

            // Overlap: compute what remains before and after the cut
            let before = start.saturating_sub(current.start).min(current.length);
            let after = current_end.saturating_sub(end);

            match (before, after) {
                (0, 0) => {
                    self.ranges.remove(i);
                }
                (before, 0) => {
                    self.ranges[i].length = before;
                    i += 1;
                }
                (0, after) => {
                    self.ranges[i] = Range {
                        start: end,
                        length: after,
                    };
                    i += 1;
                }
                (before, after) => {
                    self.ranges[i].length = before;
                    self.ranges.insert(
                        i + 1,
                        Range {
                            start: end,
                            length: after,
                        },
                    );
                    i += 2;
                }
            }
        }
    }

    /// Union with another set
    pub fn merge(&mut self, other: &Ranges) {
        for range in &other.ranges {
            self.add(range.start, range.length);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariants(ranges: &Ranges) {
        let list = ranges.ranges();
        for pair in list.windows(2) {
            assert!(
                pair[0].start + pair[0].length < pair[1].start,
                "ranges must stay sorted, disjoint, and non-adjacent: {:?}",
                list
            );
        }
        for r in list {
            assert!(r.length > 0, "zero-length range in {:?}", list);
        }
    }

    #[test]
    fn test_add_disjoint() {
        let mut r = Ranges::new(10, 10);
        r.add(21, 10);
        assert_eq!(
            r.ranges(),
            &[
                Range { start: 10, length: 10 },
                Range { start: 21, length: 10 }
            ]
        );
        assert_invariants(&r);
    }

    #[test]
    fn test_add_adjacent_merges() {
        let mut r = Ranges::new(10, 10);
        r.add(20, 10);
        assert_eq!(r.ranges(), &[Range { start: 10, length: 20 }]);
        assert_invariants(&r);
    }

    #[test]
    fn test_add_overlap_merges() {
        let mut r = Ranges::new(10, 10);
        r.add(15, 10);
        assert_eq!(r.ranges(), &[Range { start: 10, length: 15 }]);
        assert_invariants(&r);
    }

    #[test]
    fn test_add_cascades_over_following_ranges() {
        let mut r = Ranges::new(10, 5);
        r.add(20, 5);
        r.add(30, 5);
        r.add(12, 20);
        assert_eq!(r.ranges(), &[Range { start: 10, length: 25 }]);
        assert_invariants(&r);
    }

    #[test]
    fn test_add_insertion_order_irrelevant() {
        let mut a = Ranges::empty();
        a.add(30, 5);
        a.add(10, 5);
        a.add(20, 5);
        let mut b = Ranges::empty();
        b.add(10, 5);
        b.add(20, 5);
        b.add(30, 5);
        assert_eq!(a, b);
        assert_invariants(&a);
    }

    #[test]
    fn test_add_noop_cases() {
        let mut r = Ranges::new(10, 10);
        r.add(5, 0);
        r.add(u32::MAX, 10);
        assert_eq!(r.ranges(), &[Range { start: 10, length: 10 }]);
    }

    #[test]
    fn test_add_clamps_overflow() {
        let r = Ranges::new(u32::MAX - 10, 100);
        assert_eq!(
            r.ranges(),
            &[Range { start: u32::MAX - 10, length: 10 }]
        );
    }

    #[test]
    fn test_remove_whole_range() {
        let mut r = Ranges::new(10, 10);
        r.remove(10, 10);
        assert!(r.is_empty());
    }

    #[test]
    fn test_remove_splits() {
        let mut r = Ranges::new(10, 20);
        r.remove(15, 5);
        assert_eq!(
            r.ranges(),
            &[
                Range { start: 10, length: 5 },
                Range { start: 20, length: 10 }
            ]
        );
        assert_invariants(&r);
    }

    #[test]
    fn test_remove_shrinks_front_and_back() {
        let mut r = Ranges::new(10, 10);
        r.remove(5, 8); // cuts the front
        assert_eq!(r.ranges(), &[Range { start: 13, length: 7 }]);
        r.remove(15, 100); // cuts the back
        assert_eq!(r.ranges(), &[Range { start: 13, length: 2 }]);
        assert_invariants(&r);
    }

    #[test]
    fn test_remove_spans_multiple_ranges() {
        let mut r = Ranges::empty();
        r.add(10, 5);
        r.add(20, 5);
        r.add(30, 5);
        r.remove(12, 20);
        assert_eq!(
            r.ranges(),
            &[
                Range { start: 10, length: 2 },
                Range { start: 32, length: 3 }
            ]
        );
        assert_invariants(&r);
    }

    #[test]
    fn test_merge_and_length() {
        let mut a = Ranges::new(0, 10);
        let b = Ranges::new(5, 10);
        a.merge(&b);
        assert_eq!(a.ranges(), &[Range { start: 0, length: 15 }]);
        assert_eq!(a.length(), 15);
    }
}
