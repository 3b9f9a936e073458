// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, inet::EcnCounts, varint::VarInt};
use core::{convert::TryFrom, fmt, ops::RangeInclusive};
use quell_codec::{
    decoder_parameterized_value, decoder_value, DecoderBuffer, DecoderError, Encoder, EncoderValue,
};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
//# Receivers send ACK frames (types 0x02 and 0x03) to inform senders of
//# packets they have received and processed.  The ACK frame contains one
//# or more ACK Ranges.  ACK Ranges identify acknowledged packets.  If
//# the frame type is 0x03, ACK frames also contain the cumulative count
//# of QUIC packets with associated ECN marks received on the connection
//# up until this point.

const ACK_TAG: u8 = 0x02;
const ACK_ECN_TAG: u8 = 0x03;

macro_rules! tag {
    () => {
        0x02u8..=0x03u8
    };
}
pub(crate) use tag;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3
//# ACK Frame {
//#   Type (i) = 0x02..0x03,
//#   Largest Acknowledged (i),
//#   ACK Delay (i),
//#   ACK Range Count (i),
//#   First ACK Range (i),
//#   ACK Range (..) ...,
//#   [ECN Counts (..)],
//# }

/// A source of acknowledged ranges, ordered from the largest packet number
/// down
pub trait AckRanges {
    type Iter: Iterator<Item = RangeInclusive<VarInt>>;

    /// Iterates the acknowledged ranges in descending order
    fn ack_ranges(&self) -> Self::Iter;

    /// The largest acknowledged packet number
    fn largest_acknowledged(&self) -> VarInt;

    /// The number of ranges after the first
    fn interval_len(&self) -> usize;
}

#[derive(PartialEq, Eq)]
pub struct Ack<A> {
    /// The amount of time the ack was delayed, in microseconds scaled by
    /// 2^ack_delay_exponent
    pub ack_delay: VarInt,

    /// The acknowledged ranges
    pub ack_ranges: A,

    /// ECN counts, present in the 0x03 variant
    pub ecn_counts: Option<EcnCounts>,
}

impl<A: AckRanges> Ack<A> {
    #[inline]
    pub fn tag(&self) -> Tag {
        if self.ecn_counts.is_some() {
            ACK_ECN_TAG
        } else {
            ACK_TAG
        }
    }

    #[inline]
    pub fn largest_acknowledged(&self) -> VarInt {
        self.ack_ranges.largest_acknowledged()
    }

    /// Decodes the peer-reported delay given its ack_delay_exponent
    #[inline]
    pub fn ack_delay_micros(&self, exponent: u8) -> u64 {
        self.ack_delay.as_u64().saturating_shl(exponent)
    }
}

trait SaturatingShl {
    fn saturating_shl(self, shift: u8) -> Self;
}

impl SaturatingShl for u64 {
    #[inline]
    fn saturating_shl(self, shift: u8) -> Self {
        if self == 0 {
            return 0;
        }
        if u32::from(shift) >= self.leading_zeros() {
            return u64::MAX;
        }
        self << shift
    }
}

impl<A: AckRanges> fmt::Debug for Ack<A> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Ack")
            .field("ack_delay", &self.ack_delay)
            .field("largest_acknowledged", &self.largest_acknowledged())
            .field("ecn_counts", &self.ecn_counts)
            .finish()
    }
}

/// Lazily decoded ACK ranges, validated up front so iteration is infallible
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckRangesDecoder<'a> {
    largest_acknowledged: VarInt,
    interval_len: usize,
    range_buffer: DecoderBuffer<'a>,
}

impl<'a> AckRanges for AckRangesDecoder<'a> {
    type Iter = AckRangesIter<'a>;

    #[inline]
    fn ack_ranges(&self) -> Self::Iter {
        AckRangesIter {
            largest_acknowledged: Some(self.largest_acknowledged),
            buffer: self.range_buffer,
            first: true,
        }
    }

    #[inline]
    fn largest_acknowledged(&self) -> VarInt {
        self.largest_acknowledged
    }

    #[inline]
    fn interval_len(&self) -> usize {
        self.interval_len
    }
}

pub struct AckRangesIter<'a> {
    /// The largest packet number of the next range to yield, `None` once
    /// exhausted
    largest_acknowledged: Option<VarInt>,
    buffer: DecoderBuffer<'a>,
    first: bool,
}

impl<'a> Iterator for AckRangesIter<'a> {
    type Item = RangeInclusive<VarInt>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut largest = self.largest_acknowledged?;

        if !self.first {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.1
            //# Gap:  A variable-length integer indicating the number of contiguous
            //#    unacknowledged packets preceding the packet number one lower than
            //#    the smallest in the preceding ACK Range.
            let (gap, buffer) = self.buffer.decode::<VarInt>().ok()?;
            self.buffer = buffer;
            largest = largest.checked_sub(gap)?.checked_sub(VarInt::from_u8(2))?;
        }
        self.first = false;

        let (length, buffer) = self.buffer.decode::<VarInt>().ok()?;
        self.buffer = buffer;
        let smallest = largest.checked_sub(length)?;

        // position the cursor for the range after this one
        self.largest_acknowledged = smallest.checked_sub(VarInt::from_u8(1));

        Some(smallest..=largest)
    }
}

impl<'a> fmt::Debug for AckRangesIter<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AckRangesIter").finish_non_exhaustive()
    }
}

decoder_parameterized_value!(
    impl<'a> Ack<AckRangesDecoder<'a>> {
        fn decode(tag: Tag, buffer: Buffer) -> Result<Self> {
            let (largest_acknowledged, buffer) = buffer.decode::<VarInt>()?;
            let (ack_delay, buffer) = buffer.decode::<VarInt>()?;
            let (ack_range_count, buffer) = buffer.decode::<VarInt>()?;
            let interval_len = usize::try_from(ack_range_count.as_u64())
                .map_err(|_| DecoderError::InvariantViolation("invalid ack range count"))?;

            // walk the ranges once over a peeked view to validate them and
            // find their extent
            let range_len = {
                let view = buffer.peek();
                let mut cursor = view;
                let mut expected_largest = Some(largest_acknowledged);
                for index in 0..=interval_len {
                    let mut largest = expected_largest
                        .ok_or(DecoderError::InvariantViolation("invalid ack ranges"))?;
                    if index > 0 {
                        let (gap, rest) = cursor.decode::<VarInt>()?;
                        cursor = rest;
                        largest = largest
                            .checked_sub(gap)
                            .and_then(|v| v.checked_sub(VarInt::from_u8(2)))
                            .ok_or(DecoderError::InvariantViolation("invalid ack ranges"))?;
                    }
                    let (length, rest) = cursor.decode::<VarInt>()?;
                    cursor = rest;
                    let smallest = largest
                        .checked_sub(length)
                        .ok_or(DecoderError::InvariantViolation("invalid ack ranges"))?;
                    expected_largest = smallest.checked_sub(VarInt::from_u8(1));
                }
                view.len() - cursor.len()
            };

            let (range_buffer, buffer) = buffer.decode_slice(range_len)?;

            let ack_ranges = AckRangesDecoder {
                largest_acknowledged,
                interval_len,
                range_buffer: range_buffer.freeze(),
            };

            let (ecn_counts, buffer) = if tag == ACK_ECN_TAG {
                let (counts, buffer) = buffer.decode::<EcnCounts>()?;
                (Some(counts), buffer)
            } else {
                (None, buffer)
            };

            let frame = Ack {
                ack_delay,
                ack_ranges,
                ecn_counts,
            };

            Ok((frame, buffer))
        }
    }
);

impl<A: AckRanges> EncoderValue for Ack<A> {
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());

        let mut iter = self.ack_ranges.ack_ranges();
        let first = iter.next().expect("ack frame requires at least one range");

        buffer.encode(&self.ack_ranges.largest_acknowledged());
        buffer.encode(&self.ack_delay);
        buffer.encode(&VarInt::try_from(self.ack_ranges.interval_len()).unwrap_or(VarInt::MAX));

        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.1
        //# First ACK Range:  A variable-length integer indicating the number of
        //#    contiguous packets preceding the Largest Acknowledged that are
        //#    being acknowledged.
        buffer.encode(&(*first.end() - *first.start()));

        let mut previous_smallest = *first.start();
        for range in iter {
            let gap = previous_smallest - *range.end() - VarInt::from_u8(2);
            buffer.encode(&gap);
            buffer.encode(&(*range.end() - *range.start()));
            previous_smallest = *range.start();
        }

        if let Some(ecn_counts) = &self.ecn_counts {
            buffer.encode(ecn_counts);
        }
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.2
//# ECN Counts {
//#   ECT0 Count (i),
//#   ECT1 Count (i),
//#   ECN-CE Count (i),
//# }

decoder_value!(
    impl<'a> EcnCounts {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (ect_0_count, buffer) = buffer.decode()?;
            let (ect_1_count, buffer) = buffer.decode()?;
            let (ce_count, buffer) = buffer.decode()?;
            let counts = EcnCounts {
                ect_0_count,
                ect_1_count,
                ce_count,
            };
            Ok((counts, buffer))
        }
    }
);

impl EncoderValue for EcnCounts {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.ect_0_count);
        buffer.encode(&self.ect_1_count);
        buffer.encode(&self.ce_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use quell_codec::EncoderBuffer;

    /// A test implementation over a static list of descending ranges
    struct StaticRanges(&'static [(u64, u64)]);

    impl AckRanges for StaticRanges {
        type Iter = alloc::vec::IntoIter<RangeInclusive<VarInt>>;

        fn ack_ranges(&self) -> Self::Iter {
            self.0
                .iter()
                .map(|(s, e)| VarInt::new(*s).unwrap()..=VarInt::new(*e).unwrap())
                .collect::<alloc::vec::Vec<_>>()
                .into_iter()
        }

        fn largest_acknowledged(&self) -> VarInt {
            VarInt::new(self.0[0].1).unwrap()
        }

        fn interval_len(&self) -> usize {
            self.0.len() - 1
        }
    }

    fn round_trip(ranges: &'static [(u64, u64)]) {
        let frame = Ack {
            ack_delay: VarInt::from_u8(42),
            ack_ranges: StaticRanges(ranges),
            ecn_counts: None,
        };

        let mut buffer = [0u8; 256];
        let len = {
            let mut encoder = EncoderBuffer::new(&mut buffer);
            encoder.encode(&frame);
            encoder.len()
        };

        let (decoded, remaining) = Frame::decode(DecoderBuffer::new(&buffer[..len])).unwrap();
        assert!(remaining.is_empty());

        let decoded = match decoded {
            Frame::Ack(ack) => ack,
            other => panic!("expected ack, got {other:?}"),
        };

        assert_eq!(decoded.ack_delay, frame.ack_delay);
        let expected: alloc::vec::Vec<_> = frame.ack_ranges.ack_ranges().collect();
        let actual: alloc::vec::Vec<_> = decoded.ack_ranges.ack_ranges().collect();
        assert_eq!(expected, actual);
    }

    #[test]
    fn round_trip_test() {
        round_trip(&[(5, 5)]);
        round_trip(&[(0, 10)]);
        round_trip(&[(8, 10), (2, 5), (0, 0)]);
        round_trip(&[(100, 200), (50, 60), (20, 30), (0, 1)]);
    }

    #[test]
    fn ecn_counts_round_trip_test() {
        let frame = Ack {
            ack_delay: VarInt::from_u8(0),
            ack_ranges: StaticRanges(&[(3, 7)]),
            ecn_counts: Some(EcnCounts {
                ect_0_count: VarInt::from_u8(4),
                ect_1_count: VarInt::ZERO,
                ce_count: VarInt::from_u8(1),
            }),
        };

        let mut buffer = [0u8; 64];
        let len = {
            let mut encoder = EncoderBuffer::new(&mut buffer);
            encoder.encode(&frame);
            encoder.len()
        };
        assert_eq!(buffer[0], ACK_ECN_TAG);

        let (decoded, _) = Frame::decode(DecoderBuffer::new(&buffer[..len])).unwrap();
        match decoded {
            Frame::Ack(ack) => assert_eq!(ack.ecn_counts, frame.ecn_counts),
            other => panic!("expected ack, got {other:?}"),
        }
    }

    #[test]
    fn underflowing_range_test() {
        // largest = 1, first range length = 5 would underflow below zero
        let bytes = [ACK_TAG, 0x01, 0x00, 0x00, 0x05];
        assert!(Frame::decode(DecoderBuffer::new(&bytes)).is_err());
    }
}
