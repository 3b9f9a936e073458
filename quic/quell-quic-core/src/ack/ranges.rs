// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::ack, varint::VarInt};
use alloc::collections::btree_map::BTreeMap;
use core::ops::RangeInclusive;

//= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.3
//# A receiver limits the number of ACK Ranges it remembers and sends in
//# ACK frames, both to limit the size of ACK frames and to avoid
//# resource exhaustion.

/// The maximum number of disjoint ranges retained before the oldest is
/// dropped
const DEFAULT_LIMIT: usize = 256;

/// A set of packet numbers, stored as disjoint inclusive ranges
///
/// Used both as the received-packet log that produces ACK frames and for
/// duplicate detection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ranges {
    // start -> end (both inclusive)
    intervals: BTreeMap<u64, u64>,
}

impl Ranges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a packet number, merging adjacent and overlapping ranges.
    ///
    /// Returns `false` if the value was already present.
    pub fn insert(&mut self, value: VarInt) -> bool {
        let value = value.as_u64();

        if self.contains_u64(value) {
            return false;
        }

        let mut start = value;
        let mut end = value;

        // merge with the range immediately below
        if let Some((&prev_start, &prev_end)) = self.intervals.range(..=value).next_back() {
            debug_assert!(prev_end < value);
            if prev_end + 1 == value {
                start = prev_start;
                self.intervals.remove(&prev_start);
            }
        }

        // merge with the range immediately above
        if let Some((&next_start, &next_end)) = self.intervals.range(value + 1..).next() {
            if value + 1 == next_start {
                end = next_end;
                self.intervals.remove(&next_start);
            }
        }

        self.intervals.insert(start, end);

        if self.intervals.len() > DEFAULT_LIMIT {
            // forget the oldest range; the peer will have long stopped
            // retransmitting packets that far back
            let oldest = *self.intervals.keys().next().unwrap();
            self.intervals.remove(&oldest);
        }

        true
    }

    #[inline]
    fn contains_u64(&self, value: u64) -> bool {
        self.intervals
            .range(..=value)
            .next_back()
            .map(|(_, &end)| value <= end)
            .unwrap_or(false)
    }

    /// Returns true if the packet number has been recorded
    #[inline]
    pub fn contains(&self, value: VarInt) -> bool {
        self.contains_u64(value.as_u64())
    }

    /// The largest recorded packet number
    #[inline]
    pub fn max_value(&self) -> Option<VarInt> {
        self.intervals
            .iter()
            .next_back()
            .map(|(_, &end)| unsafe { VarInt::new_unchecked(end) })
    }

    /// The smallest recorded packet number
    #[inline]
    pub fn min_value(&self) -> Option<VarInt> {
        self.intervals
            .keys()
            .next()
            .map(|&start| unsafe { VarInt::new_unchecked(start) })
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// The number of disjoint ranges
    #[inline]
    pub fn interval_len(&self) -> usize {
        self.intervals.len()
    }

    /// Removes everything up to and including `value`
    pub fn remove_until(&mut self, value: VarInt) {
        let value = value.as_u64();
        let mut keep = self.intervals.split_off(&(value + 1));
        // the range straddling the cut point survives with a new start
        if let Some((_, &end)) = self.intervals.iter().next_back() {
            if end > value {
                keep.insert(value + 1, end);
            }
        }
        self.intervals = keep;
    }

    /// Clears all recorded packet numbers
    pub fn clear(&mut self) {
        self.intervals.clear();
    }

    /// Iterates the ranges in descending order
    pub fn iter_descending(&self) -> Iter<'_> {
        Iter {
            inner: self.intervals.iter().rev(),
        }
    }

    /// Iterates every value in ascending order; test-sized sets only
    #[cfg(any(test, feature = "testing"))]
    pub fn iter_values(&self) -> impl Iterator<Item = u64> + '_ {
        self.intervals
            .iter()
            .flat_map(|(&start, &end)| start..=end)
    }
}

pub struct Iter<'a> {
    inner: core::iter::Rev<alloc::collections::btree_map::Iter<'a, u64, u64>>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = RangeInclusive<VarInt>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let (&start, &end) = self.inner.next()?;
        // Safety: only varint-ranged values are inserted
        unsafe { Some(VarInt::new_unchecked(start)..=VarInt::new_unchecked(end)) }
    }
}

impl<'a> ack::AckRanges for &'a Ranges {
    type Iter = Iter<'a>;

    #[inline]
    fn ack_ranges(&self) -> Self::Iter {
        self.iter_descending()
    }

    #[inline]
    fn largest_acknowledged(&self) -> VarInt {
        self.max_value().expect("ack ranges must not be empty")
    }

    #[inline]
    fn interval_len(&self) -> usize {
        Ranges::interval_len(self) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolero::check;

    #[test]
    fn insert_merges_ranges() {
        let mut ranges = Ranges::new();
        assert!(ranges.insert(VarInt::from_u8(5)));
        assert!(ranges.insert(VarInt::from_u8(3)));
        assert!(ranges.insert(VarInt::from_u8(4)));
        assert_eq!(ranges.interval_len(), 1);
        assert!(!ranges.insert(VarInt::from_u8(4)));

        assert!(ranges.insert(VarInt::from_u8(9)));
        assert_eq!(ranges.interval_len(), 2);
        assert_eq!(ranges.max_value(), Some(VarInt::from_u8(9)));
        assert_eq!(ranges.min_value(), Some(VarInt::from_u8(3)));
    }

    #[test]
    fn remove_until_test() {
        let mut ranges = Ranges::new();
        for value in [1u8, 2, 3, 7, 8, 12] {
            ranges.insert(VarInt::from_u8(value));
        }

        ranges.remove_until(VarInt::from_u8(7));
        assert!(!ranges.contains(VarInt::from_u8(3)));
        assert!(!ranges.contains(VarInt::from_u8(7)));
        assert!(ranges.contains(VarInt::from_u8(8)));
        assert!(ranges.contains(VarInt::from_u8(12)));
    }

    /// Any set of up to 256 packet numbers encodes into an ACK frame and
    /// decodes back to the same set
    #[test]
    fn ack_frame_round_trip_test() {
        use crate::frame::{ack::AckRanges as _, Ack, Frame};
        use quell_codec::{DecoderBuffer, EncoderBuffer};

        check!()
            .with_type::<alloc::vec::Vec<u16>>()
            .for_each(|values| {
                if values.is_empty() || values.len() > 256 {
                    return;
                }

                let mut ranges = Ranges::new();
                for value in values {
                    ranges.insert(VarInt::from_u16(*value));
                }

                let frame = Ack {
                    ack_delay: VarInt::ZERO,
                    ack_ranges: &ranges,
                    ecn_counts: None,
                };

                let mut buffer = alloc::vec![0u8; 8192];
                let len = {
                    let mut encoder = EncoderBuffer::new(&mut buffer);
                    quell_codec::Encoder::encode(&mut encoder, &frame);
                    quell_codec::Encoder::len(&encoder)
                };

                let (decoded, _) =
                    Frame::decode(DecoderBuffer::new(&buffer[..len])).unwrap();
                let decoded = match decoded {
                    Frame::Ack(ack) => ack,
                    other => panic!("expected ack, got {other:?}"),
                };

                let expected: alloc::vec::Vec<_> = ranges.iter_descending().collect();
                let actual: alloc::vec::Vec<_> = decoded.ack_ranges.ack_ranges().collect();
                assert_eq!(expected, actual);
            });
    }
}
