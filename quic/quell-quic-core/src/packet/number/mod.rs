// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//= https://www.rfc-editor.org/rfc/rfc9000#section-12.3
//# The packet number is an integer in the range 0 to 2^62-1.  This
//# number is used in determining the cryptographic nonce for packet
//# protection.  Each endpoint maintains a separate packet number for
//# sending and receiving.

use crate::varint::VarInt;
use core::fmt;
use quell_codec::{DecoderBuffer, DecoderBufferResult, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-12.3
//# *  Initial space: All Initial packets (Section 17.2.2) are in this
//#    space.
//#
//# *  Handshake space: All Handshake packets (Section 17.2.4) are in
//#    this space.
//#
//# *  Application data space: All 0-RTT (Section 17.2.3) and 1-RTT
//#    (Section 17.3) encrypted packets are in this space.

/// The three packet number spaces, each with independent numbering, keys
/// and loss state
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PacketNumberSpace {
    Initial,
    Handshake,
    ApplicationData,
}

impl PacketNumberSpace {
    pub const COUNT: usize = 3;

    #[inline]
    pub fn is_initial(self) -> bool {
        matches!(self, Self::Initial)
    }

    #[inline]
    pub fn is_handshake(self) -> bool {
        matches!(self, Self::Handshake)
    }

    #[inline]
    pub fn is_application_data(self) -> bool {
        matches!(self, Self::ApplicationData)
    }

    #[inline]
    pub fn as_index(self) -> usize {
        match self {
            Self::Initial => 0,
            Self::Handshake => 1,
            Self::ApplicationData => 2,
        }
    }

    /// Creates a `PacketNumber` in this space
    #[inline]
    pub fn new_packet_number(self, value: VarInt) -> PacketNumber {
        PacketNumber { space: self, value }
    }

    /// Derives the packet number length from the low bits of an unprotected
    /// packet tag
    #[inline]
    pub fn new_packet_number_len(self, tag: u8) -> PacketNumberLen {
        PacketNumberLen {
            space: self,
            //= https://www.rfc-editor.org/rfc/rfc9000#section-17.1
            //# pn_length = (packet[0] & 0x03) + 1
            bytesize: (tag & PACKET_NUMBER_LEN_MASK) as usize + 1,
        }
    }

    #[inline]
    pub(crate) fn assert_eq(self, other: Self) {
        debug_assert_eq!(self, other, "packet number spaces must match");
    }
}

/// The packet number len is the two least significant bits of the packet tag
pub(crate) const PACKET_NUMBER_LEN_MASK: u8 = 0b11;

/// A full packet number within a space
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketNumber {
    space: PacketNumberSpace,
    value: VarInt,
}

impl fmt::Debug for PacketNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}#{}", self.space, self.value)
    }
}

impl PacketNumber {
    #[inline]
    pub fn space(self) -> PacketNumberSpace {
        self.space
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.value.as_u64()
    }

    #[inline]
    pub fn as_varint(self) -> VarInt {
        self.value
    }

    /// Returns the packet number that follows, or `None` at the end of the
    /// space
    #[inline]
    pub fn next(self) -> Option<Self> {
        let value = self.value.checked_add(VarInt::from_u8(1))?;
        Some(self.space.new_packet_number(value))
    }

    /// Returns the preceding packet number, or `None` at zero
    #[inline]
    pub fn checked_sub(self, value: u64) -> Option<Self> {
        let value = VarInt::new(value).ok()?;
        Some(self.space.new_packet_number(self.value.checked_sub(value)?))
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.1
    //# the sender MUST use a packet number size able to represent more than
    //# twice as large a range as the difference between the largest
    //# acknowledged packet and the packet number being sent.
    /// Truncates the packet number for transmission, given the largest
    /// packet number acknowledged by the peer
    #[inline]
    pub fn truncate(self, largest_acknowledged: Self) -> Option<TruncatedPacketNumber> {
        self.space.assert_eq(largest_acknowledged.space);

        let value = self.as_u64();
        let range = value
            .checked_sub(largest_acknowledged.as_u64())?
            .checked_mul(2)?;

        let bytesize = if range < (1 << 8) {
            1
        } else if range < (1 << 16) {
            2
        } else if range < (1 << 24) {
            3
        } else if range < (1 << 32) {
            4
        } else {
            return None;
        };

        Some(TruncatedPacketNumber {
            space: self.space,
            value: value & ((1u64 << (bytesize * 8)) - 1),
            bytesize,
        })
    }
}

/// The encoded size of a truncated packet number: 1..=4 bytes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PacketNumberLen {
    space: PacketNumberSpace,
    bytesize: usize,
}

impl PacketNumberLen {
    #[inline]
    pub fn bytesize(self) -> usize {
        self.bytesize
    }

    /// The bits stored in the low two bits of the packet tag
    #[inline]
    pub fn into_packet_tag_mask(self) -> u8 {
        (self.bytesize - 1) as u8
    }

    /// Decodes a truncated packet number of this length
    #[inline]
    pub fn decode_truncated_packet_number<'a>(
        self,
        buffer: DecoderBuffer<'a>,
    ) -> DecoderBufferResult<'a, TruncatedPacketNumber> {
        let (bytes, buffer) = buffer.decode_slice(self.bytesize)?;
        let mut value = 0u64;
        for byte in bytes.as_less_safe_slice() {
            value = (value << 8) | *byte as u64;
        }
        Ok((
            TruncatedPacketNumber {
                space: self.space,
                value,
                bytesize: self.bytesize,
            },
            buffer,
        ))
    }
}

/// A packet number reduced to its least significant 1-4 bytes for the wire
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TruncatedPacketNumber {
    space: PacketNumberSpace,
    value: u64,
    bytesize: usize,
}

impl TruncatedPacketNumber {
    #[inline]
    pub fn space(self) -> PacketNumberSpace {
        self.space
    }

    #[inline]
    pub fn len(self) -> PacketNumberLen {
        PacketNumberLen {
            space: self.space,
            bytesize: self.bytesize,
        }
    }

    #[inline]
    pub fn bitsize(self) -> usize {
        self.bytesize * 8
    }

    #[inline]
    pub fn into_u64(self) -> u64 {
        self.value
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(value: u64, bytesize: usize, space: PacketNumberSpace) -> Self {
        Self {
            space,
            value,
            bytesize,
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#appendix-A.3
    //# DecodePacketNumber(largest_pn, truncated_pn, pn_nbits):
    //#    expected_pn  = largest_pn + 1
    //#    pn_win       = 1 << pn_nbits
    //#    pn_hwin      = pn_win / 2
    //#    pn_mask      = pn_win - 1
    //#    // The incoming packet number should be greater than
    //#    // expected_pn - pn_hwin and less than or equal to
    //#    // expected_pn + pn_hwin
    //#    //
    //#    // This means we cannot just strip the trailing bits from
    //#    // expected_pn and add the truncated_pn because that might
    //#    // yield a value outside the window.
    //#    //
    //#    // The following code calculates a candidate value and
    //#    // makes sure it's within the packet number window.
    //#    // Note the extra checks to prevent overflow and underflow.
    //#    candidate_pn = (expected_pn & ~pn_mask) | truncated_pn
    //#    if candidate_pn <= expected_pn - pn_hwin and
    //#       candidate_pn < (1 << 62) - pn_win:
    //#       return candidate_pn + pn_win
    //#    if candidate_pn > expected_pn + pn_hwin and
    //#       candidate_pn >= pn_win:
    //#       return candidate_pn - pn_win
    //#    return candidate_pn
    /// Expands the truncated number against the largest packet number
    /// received in the space
    #[inline]
    pub fn expand(self, largest_pn: PacketNumber) -> PacketNumber {
        self.space.assert_eq(largest_pn.space);

        let pn_nbits = self.bitsize();
        let expected_pn = largest_pn.as_u64() + 1;
        let pn_win = 1u64 << pn_nbits;
        let pn_hwin = pn_win / 2;
        let pn_mask = pn_win - 1;

        let candidate_pn = (expected_pn & !pn_mask) | self.value;

        let value = if expected_pn
            .checked_sub(pn_hwin)
            .map_or(false, |low| candidate_pn <= low)
            && candidate_pn < (1u64 << 62) - pn_win
        {
            candidate_pn + pn_win
        } else if candidate_pn > expected_pn + pn_hwin && candidate_pn >= pn_win {
            candidate_pn - pn_win
        } else {
            candidate_pn
        };

        let value = value.min(VarInt::MAX.as_u64());
        // Safety: clamped to the varint range above
        let value = unsafe { VarInt::new_unchecked(value) };

        self.space.new_packet_number(value)
    }
}

impl EncoderValue for TruncatedPacketNumber {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let bytes = self.value.to_be_bytes();
        encoder.write_slice(&bytes[8 - self.bytesize..]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolero::check;

    fn new(value: u64) -> PacketNumber {
        PacketNumberSpace::Initial.new_packet_number(VarInt::new(value).unwrap())
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#appendix-A.3
    //= type=test
    //# For example, if the highest successfully authenticated packet had a
    //# packet number of 0xa82f30ea, then a packet containing a 16-bit value
    //# of 0x9b32 will be decoded as 0xa82f9b32.
    #[test]
    fn rfc_expansion_example_test() {
        let largest = new(0xa82f30ea);
        let truncated =
            TruncatedPacketNumber::new_for_test(0x9b32, 2, PacketNumberSpace::Initial);
        assert_eq!(truncated.expand(largest), new(0xa82f9b32));
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.1
    //= type=test
    //# For example, if an endpoint has received an acknowledgment for packet
    //# 0xabe8bc, sending a packet with a number of 0xac5c02 requires a
    //# packet number encoding with 16 bits or more; whereas the 24-bit
    //# packet number encoding is needed to send a packet with a number of
    //# 0xace8fe.
    #[test]
    fn truncation_size_example_test() {
        let largest_acknowledged = new(0x00ab_e8bc);

        assert_eq!(
            new(0x00ac_5c02)
                .truncate(largest_acknowledged)
                .unwrap()
                .bitsize(),
            16
        );
        assert_eq!(
            new(0x00ac_e8fe)
                .truncate(largest_acknowledged)
                .unwrap()
                .bitsize(),
            24
        );
    }

    #[test]
    fn truncate_expand_round_trip_test() {
        check!()
            .with_type::<(u64, u64)>()
            .cloned()
            .for_each(|(largest, value)| {
                let largest = new(largest & VarInt::MAX.as_u64());
                let value = new(value & VarInt::MAX.as_u64());
                if let Some(truncated) = value.truncate(largest) {
                    assert_eq!(truncated.expand(largest), value);
                }
            });
    }

    #[test]
    fn tag_mask_round_trip_test() {
        for bytesize in 1..=4usize {
            let len = PacketNumberLen {
                space: PacketNumberSpace::Initial,
                bytesize,
            };
            let tag = len.into_packet_tag_mask();
            let recovered = PacketNumberSpace::Initial.new_packet_number_len(tag);
            assert_eq!(recovered.bytesize(), bytesize);
        }
    }
}
