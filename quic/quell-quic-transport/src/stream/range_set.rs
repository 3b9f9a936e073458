// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use alloc::collections::BTreeMap;
use core::ops::Range;

/// A set of byte offsets stored as disjoint half-open ranges
///
/// Tracks which parts of a stream still need (re)transmission and which
/// have been acknowledged.
#[derive(Clone, Debug, Default)]
pub struct RangeSet {
    // start -> end (exclusive)
    ranges: BTreeMap<u64, u64>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Total number of bytes covered
    pub fn len(&self) -> u64 {
        self.ranges.iter().map(|(start, end)| end - start).sum()
    }

    /// The smallest covered offset
    pub fn min(&self) -> Option<u64> {
        self.ranges.keys().next().copied()
    }

    /// Inserts `range`, merging with neighbors
    pub fn insert(&mut self, range: Range<u64>) {
        if range.is_empty() {
            return;
        }

        let mut start = range.start;
        let mut end = range.end;

        // absorb a range that begins at or before the new start
        if let Some((&prev_start, &prev_end)) = self.ranges.range(..=start).next_back() {
            if prev_end >= start {
                start = prev_start;
                end = end.max(prev_end);
                self.ranges.remove(&prev_start);
            }
        }

        // absorb every range that begins inside the merged span
        loop {
            let Some((&next_start, &next_end)) = self.ranges.range(start..=end).next() else {
                break;
            };
            end = end.max(next_end);
            self.ranges.remove(&next_start);
        }

        self.ranges.insert(start, end);
    }

    /// Removes and returns up to `max_len` bytes from the lowest range
    pub fn pop_min(&mut self, max_len: u64) -> Option<Range<u64>> {
        debug_assert!(max_len > 0);
        let (&start, &end) = self.ranges.iter().next()?;
        self.ranges.remove(&start);

        let take_end = end.min(start + max_len);
        if take_end < end {
            self.ranges.insert(take_end, end);
        }

        Some(start..take_end)
    }

    /// Removes `range` from the set, splitting covering ranges as needed
    pub fn remove(&mut self, range: Range<u64>) {
        if range.is_empty() {
            return;
        }

        let mut touched = alloc::vec::Vec::new();
        if let Some((&start, &end)) = self.ranges.range(..=range.start).next_back() {
            if end > range.start {
                touched.push((start, end));
            }
        }
        for (&start, &end) in self.ranges.range(range.start..range.end) {
            touched.push((start, end));
        }

        for (start, end) in touched {
            self.ranges.remove(&start);
            if start < range.start {
                self.ranges.insert(start, range.start);
            }
            if end > range.end {
                self.ranges.insert(range.end, end);
            }
        }
    }

    /// Returns the end of the range containing `offset`, if any
    pub fn end_of_range_containing(&self, offset: u64) -> Option<u64> {
        self.ranges
            .range(..=offset)
            .next_back()
            .and_then(|(_, &end)| (end > offset).then_some(end))
    }

    /// Returns true if every offset in `range` is covered
    pub fn contains_range(&self, range: Range<u64>) -> bool {
        if range.is_empty() {
            return true;
        }
        self.ranges
            .range(..=range.start)
            .next_back()
            .map_or(false, |(_, &end)| end >= range.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_merges() {
        let mut set = RangeSet::new();
        set.insert(0..10);
        set.insert(20..30);
        set.insert(10..20);
        assert_eq!(set.len(), 30);
        assert!(set.contains_range(0..30));
    }

    #[test]
    fn pop_min_respects_limit() {
        let mut set = RangeSet::new();
        set.insert(5..100);

        assert_eq!(set.pop_min(10), Some(5..15));
        assert_eq!(set.pop_min(1000), Some(15..100));
        assert_eq!(set.pop_min(1), None);
    }

    #[test]
    fn remove_splits() {
        let mut set = RangeSet::new();
        set.insert(0..100);
        set.remove(10..20);

        assert!(set.contains_range(0..10));
        assert!(set.contains_range(20..100));
        assert!(!set.contains_range(9..11));
        assert_eq!(set.len(), 90);
    }
}
