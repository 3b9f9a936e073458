// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::{fmt, ops::Deref};
use quell_codec::{decoder_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-16
//# QUIC packets and frames commonly use a variable-length encoding for
//# non-negative integer values.  This encoding ensures that smaller
//# integer values need fewer bytes to encode.

//= https://www.rfc-editor.org/rfc/rfc9000#section-16
//# This means that integers are encoded on 1, 2, 4, or 8 bytes and can
//# encode 6-, 14-, 30-, or 62-bit values, respectively.  Table 4
//# summarizes the encoding properties.
//#
//#        +======+========+=============+=======================+
//#        | 2MSB | Length | Usable Bits | Range                 |
//#        +======+========+=============+=======================+
//#        | 00   | 1      | 6           | 0-63                  |
//#        +------+--------+-------------+-----------------------+
//#        | 01   | 2      | 14          | 0-16383               |
//#        +------+--------+-------------+-----------------------+
//#        | 10   | 4      | 30          | 0-1073741823          |
//#        +------+--------+-------------+-----------------------+
//#        | 11   | 8      | 62          | 0-4611686018427387903 |
//#        +------+--------+-------------+-----------------------+

pub const MAX_VARINT_VALUE: u64 = 4_611_686_018_427_387_903;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VarIntError;

impl fmt::Display for VarIntError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "varint range exceeded")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for VarIntError {}

/// Returns (two_bit prefix, encoded length, usable bits) for a value
#[inline(always)]
fn encoding_table_entry(x: u64) -> (u64, usize, u64) {
    debug_assert!(x <= MAX_VARINT_VALUE);

    let two_bit: u64 = match x {
        0..=63 => 0b00,
        64..=16_383 => 0b01,
        16_384..=1_073_741_823 => 0b10,
        _ => 0b11,
    };

    let len = 1usize << two_bit;
    let usable_bits = (len as u64) * 8 - 2;

    (two_bit, len, usable_bits)
}

/// An integer in the QUIC variable-length range [0, 2^62-1]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct VarInt(u64);

impl fmt::Display for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl VarInt {
    pub const MAX: Self = Self(MAX_VARINT_VALUE);

    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn new(v: u64) -> Result<Self, VarIntError> {
        if v > MAX_VARINT_VALUE {
            return Err(VarIntError);
        }
        Ok(Self(v))
    }

    /// Returns a `VarInt` without validating the value is in range
    ///
    /// # Safety
    ///
    /// Callers need to ensure the value is less than or equal to `VarInt::MAX`
    #[inline]
    pub const unsafe fn new_unchecked(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn from_u8(v: u8) -> Self {
        Self(v as u64)
    }

    #[inline]
    pub const fn from_u16(v: u16) -> Self {
        Self(v as u64)
    }

    #[inline]
    pub const fn from_u32(v: u32) -> Self {
        Self(v as u64)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The number of bytes the minimum-width encoding occupies
    #[inline]
    pub fn encoding_size(self) -> usize {
        encoding_table_entry(self.0).1
    }

    #[inline]
    pub fn checked_add(self, value: Self) -> Option<Self> {
        Self::new(self.0.checked_add(value.0)?).ok()
    }

    #[inline]
    pub fn checked_add_usize(self, value: usize) -> Option<Self> {
        let value = Self::try_from(value).ok()?;
        self.checked_add(value)
    }

    #[inline]
    #[must_use]
    pub fn saturating_add(self, value: Self) -> Self {
        Self::new(self.0.saturating_add(value.0)).unwrap_or(Self::MAX)
    }

    #[inline]
    pub fn checked_sub(self, value: Self) -> Option<Self> {
        Some(Self(self.0.checked_sub(value.0)?))
    }

    #[inline]
    #[must_use]
    pub fn saturating_sub(self, value: Self) -> Self {
        Self(self.0.saturating_sub(value.0))
    }

    #[inline]
    pub fn checked_mul(self, value: Self) -> Option<Self> {
        Self::new(self.0.checked_mul(value.0)?).ok()
    }

    #[inline]
    #[must_use]
    pub fn saturating_mul(self, value: Self) -> Self {
        Self::new(self.0.saturating_mul(value.0)).unwrap_or(Self::MAX)
    }
}

impl Deref for VarInt {
    type Target = u64;

    #[inline]
    fn deref(&self) -> &u64 {
        &self.0
    }
}

impl From<VarInt> for u64 {
    #[inline]
    fn from(v: VarInt) -> u64 {
        v.0
    }
}

impl From<u8> for VarInt {
    #[inline]
    fn from(v: u8) -> Self {
        Self(v as u64)
    }
}

impl From<u16> for VarInt {
    #[inline]
    fn from(v: u16) -> Self {
        Self(v as u64)
    }
}

impl From<u32> for VarInt {
    #[inline]
    fn from(v: u32) -> Self {
        Self(v as u64)
    }
}

impl TryFrom<u64> for VarInt {
    type Error = VarIntError;

    #[inline]
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<usize> for VarInt {
    type Error = VarIntError;

    #[inline]
    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value as u64)
    }
}

impl TryFrom<VarInt> for usize {
    type Error = VarIntError;

    #[inline]
    fn try_from(value: VarInt) -> Result<Self, Self::Error> {
        value.0.try_into().map_err(|_| VarIntError)
    }
}

impl core::ops::Add<VarInt> for VarInt {
    type Output = VarInt;

    /// # Panics
    /// Panics on overflow of the varint range in debug builds
    #[inline]
    fn add(self, rhs: VarInt) -> Self::Output {
        debug_assert!(self.0 + rhs.0 <= MAX_VARINT_VALUE);
        Self(self.0 + rhs.0)
    }
}

impl core::ops::Sub<VarInt> for VarInt {
    type Output = VarInt;

    #[inline]
    fn sub(self, rhs: VarInt) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl PartialEq<u64> for VarInt {
    #[inline]
    fn eq(&self, other: &u64) -> bool {
        self.0.eq(other)
    }
}

impl PartialOrd<u64> for VarInt {
    #[inline]
    fn partial_cmp(&self, other: &u64) -> Option<core::cmp::Ordering> {
        self.0.partial_cmp(other)
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-16
//# The QUIC variable-length integer encoding reserves the two most
//# significant bits of the first byte to encode the base 2 logarithm of
//# the integer encoding length in bytes.  The integer value is encoded
//# on the remaining bits, in network byte order.

decoder_value!(
    impl<'a> VarInt {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (first, buffer) = buffer.decode::<u8>()?;
            let length = 1usize << (first >> 6);
            let mut value = (first & 0b0011_1111) as u64;
            let (rest, buffer) = buffer.decode_slice(length - 1)?;
            for byte in rest.as_less_safe_slice() {
                value = (value << 8) | *byte as u64;
            }
            Ok((VarInt(value), buffer))
        }
    }
);

impl EncoderValue for VarInt {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        let (two_bit, len, usable_bits) = encoding_table_entry(self.0);
        encoder.write_sized(len, |buffer| {
            let bytes = ((two_bit << usable_bits) | self.0).to_be_bytes();
            buffer.copy_from_slice(&bytes[8 - len..]);
        });
    }

    #[inline]
    fn encoding_size(&self) -> usize {
        encoding_table_entry(self.0).1
    }

    #[inline]
    fn encoding_size_for_encoder<E: Encoder>(&self, _encoder: &E) -> usize {
        encoding_table_entry(self.0).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolero::check;
    use quell_codec::{DecoderBuffer, EncoderBuffer};

    fn round_trip(value: VarInt) -> (usize, VarInt) {
        let mut buffer = [0u8; 8];
        let len = {
            let mut encoder = EncoderBuffer::new(&mut buffer);
            encoder.encode(&value);
            encoder.len()
        };
        let decoder = DecoderBuffer::new(&buffer[..len]);
        let (decoded, remaining) = decoder.decode::<VarInt>().unwrap();
        assert!(remaining.is_empty());
        (len, decoded)
    }

    #[test]
    fn round_trip_test() {
        check!().with_type::<u64>().cloned().for_each(|value| {
            let value = value & MAX_VARINT_VALUE;
            let value = VarInt::new(value).unwrap();
            let (_, decoded) = round_trip(value);
            assert_eq!(value, decoded);
        });
    }

    #[test]
    fn minimum_width_test() {
        for (value, expected) in [
            (0u64, 1usize),
            (63, 1),
            (64, 2),
            (16_383, 2),
            (16_384, 4),
            (1_073_741_823, 4),
            (1_073_741_824, 8),
            (MAX_VARINT_VALUE, 8),
        ] {
            let value = VarInt::new(value).unwrap();
            let (len, _) = round_trip(value);
            assert_eq!(len, expected);
            assert_eq!(value.encoding_size(), expected);
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#appendix-A.1
    //= type=test
    //# For example, the eight-byte sequence 0xc2197c5eff14e88c decodes to
    //# the decimal value 151,288,809,941,952,652; the four-byte sequence
    //# 0x9d7f3e7d decodes to 494,878,333; the two-byte sequence 0x7bbd
    //# decodes to 16,515; and the single byte 0x25 decodes to 37
    #[test]
    fn rfc_example_test() {
        for (bytes, expected) in [
            (&[0xc2u8, 0x19, 0x7c, 0x5e, 0xff, 0x14, 0xe8, 0x8c][..], 151_288_809_941_952_652u64),
            (&[0x9d, 0x7f, 0x3e, 0x7d][..], 494_878_333),
            (&[0x7b, 0xbd][..], 16_515),
            (&[0x25][..], 37),
        ] {
            let buffer = DecoderBuffer::new(bytes);
            let (value, remaining) = buffer.decode::<VarInt>().unwrap();
            assert!(remaining.is_empty());
            assert_eq!(value.as_u64(), expected);
        }
    }

    #[test]
    fn non_canonical_decode_test() {
        // 37 encoded on two bytes is accepted on decode
        let buffer = DecoderBuffer::new(&[0x40, 0x25]);
        let (value, _) = buffer.decode::<VarInt>().unwrap();
        assert_eq!(value.as_u64(), 37);
        // the encoder still emits the shortest form
        assert_eq!(value.encoding_size(), 1);
    }

    #[test]
    fn truncated_decode_test() {
        let buffer = DecoderBuffer::new(&[0xc2, 0x19, 0x7c]);
        assert!(buffer.decode::<VarInt>().is_err());
    }
}
