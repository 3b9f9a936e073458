// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::random;
use core::fmt;
use quell_codec::{decoder_value, DecoderError, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-5.1
//# Each connection possesses a set of connection identifiers, or
//# connection IDs, each of which can identify the connection.
//# Connection IDs are independently selected by endpoints; each endpoint
//# selects the connection IDs that its peer uses.

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
//# In QUIC version 1, this value MUST NOT exceed 20 bytes.
pub const MAX_LEN: usize = 20;

/// An opaque connection identifier of 0..=20 bytes
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct ConnectionId {
    bytes: [u8; MAX_LEN],
    len: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Error;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "connection id exceeds 20 bytes")
    }
}

impl ConnectionId {
    pub const EMPTY: Self = Self {
        bytes: [0; MAX_LEN],
        len: 0,
    };

    /// Creates a `ConnectionId` from a slice of at most 20 bytes
    #[inline]
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, Error> {
        if slice.len() > MAX_LEN {
            return Err(Error);
        }
        let mut bytes = [0; MAX_LEN];
        bytes[..slice.len()].copy_from_slice(slice);
        Ok(Self {
            bytes,
            len: slice.len() as u8,
        })
    }

    /// Generates a random connection id of the given length
    pub fn generate<R: random::Generator + ?Sized>(random: &mut R, len: usize) -> Self {
        debug_assert!(len <= MAX_LEN);
        let len = len.min(MAX_LEN);
        let mut bytes = [0; MAX_LEN];
        random.fill_secure(&mut bytes[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl AsRef<[u8]> for ConnectionId {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x")?;
        for byte in self.as_slice() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl TryFrom<&[u8]> for ConnectionId {
    type Error = Error;

    #[inline]
    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        Self::try_from_slice(slice)
    }
}

// Decodes a connection id with a single-byte length prefix, the form used
// by long packet headers and NEW_CONNECTION_ID frames
decoder_value!(
    impl<'a> ConnectionId {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (data, buffer) = buffer.decode_slice_with_len_prefix::<u8>()?;
            let data = data.into_less_safe_slice();
            let connection_id = ConnectionId::try_from_slice(data)
                .map_err(|_| DecoderError::InvariantViolation("invalid connection id"))?;

            Ok((connection_id, buffer))
        }
    }
);

impl EncoderValue for ConnectionId {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        self.len.encode(encoder);
        encoder.write_slice(self.as_slice());
    }
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-10.3
//# A stateless reset token is specific to a connection ID.  An endpoint
//# issues a stateless reset token by including the value in the
//# Stateless Reset Token field of a NEW_CONNECTION_ID frame.

pub const STATELESS_RESET_TOKEN_LEN: usize = 16;

/// A 16-byte token that allows a peer to recognize a stateless reset
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct StatelessResetToken([u8; STATELESS_RESET_TOKEN_LEN]);

impl StatelessResetToken {
    pub const ZEROED: Self = Self([0; STATELESS_RESET_TOKEN_LEN]);

    #[inline]
    pub const fn new(bytes: [u8; STATELESS_RESET_TOKEN_LEN]) -> Self {
        Self(bytes)
    }

    /// Generates a random token
    pub fn generate<R: random::Generator + ?Sized>(random: &mut R) -> Self {
        let mut bytes = [0; STATELESS_RESET_TOKEN_LEN];
        random.fill_secure(&mut bytes);
        Self(bytes)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for StatelessResetToken {
    #[inline]
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

decoder_value!(
    impl<'a> StatelessResetToken {
        fn decode(buffer: Buffer) -> Result<Self> {
            let (data, buffer) = buffer.decode_slice(STATELESS_RESET_TOKEN_LEN)?;
            let mut bytes = [0; STATELESS_RESET_TOKEN_LEN];
            bytes.copy_from_slice(data.into_less_safe_slice());
            Ok((Self(bytes), buffer))
        }
    }
);

impl EncoderValue for StatelessResetToken {
    #[inline]
    fn encode<E: Encoder>(&self, encoder: &mut E) {
        encoder.write_slice(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_bounds_test() {
        assert!(ConnectionId::try_from_slice(&[0u8; 20]).is_ok());
        assert!(ConnectionId::try_from_slice(&[0u8; 21]).is_err());
        assert!(ConnectionId::try_from_slice(&[]).unwrap().is_empty());
    }

    #[test]
    fn equality_is_bytewise() {
        let a = ConnectionId::try_from_slice(&[1, 2, 3]).unwrap();
        let b = ConnectionId::try_from_slice(&[1, 2, 3]).unwrap();
        let c = ConnectionId::try_from_slice(&[1, 2, 3, 0]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
