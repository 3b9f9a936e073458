// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    connection::{ConnectionId, StatelessResetToken},
    frame::Tag,
    varint::VarInt,
};
use quell_codec::{decoder_parameterized_value, DecoderError, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
//# An endpoint sends a NEW_CONNECTION_ID frame (type=0x18) to provide
//# its peer with alternative connection IDs that can be used to break
//# linkability when migrating connections.

pub(crate) const TAG: u8 = 0x18;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
//# NEW_CONNECTION_ID Frame {
//#   Type (i) = 0x18,
//#   Sequence Number (i),
//#   Retire Prior To (i),
//#   Length (8),
//#   Connection ID (8..160),
//#   Stateless Reset Token (128),
//# }

#[derive(Debug, PartialEq, Eq)]
pub struct NewConnectionId {
    /// The sequence number assigned to the connection ID by the sender
    pub sequence_number: VarInt,

    /// The sequence number below which connection IDs should be retired
    pub retire_prior_to: VarInt,

    /// The new connection ID
    pub connection_id: ConnectionId,

    /// A token to recognize a stateless reset issued for this connection ID
    pub stateless_reset_token: StatelessResetToken,
}

impl NewConnectionId {
    pub const fn tag(&self) -> Tag {
        TAG
    }
}

decoder_parameterized_value!(
    impl<'a> NewConnectionId {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            let (sequence_number, buffer) = buffer.decode::<VarInt>()?;
            let (retire_prior_to, buffer) = buffer.decode::<VarInt>()?;

            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
            //# The Retire Prior To field MUST be less than or equal to the
            //# Sequence Number field.  Receiving a value in the Retire Prior To
            //# field that is greater than that in the Sequence Number field MUST
            //# be treated as a connection error of type FRAME_ENCODING_ERROR.
            if retire_prior_to > sequence_number {
                return Err(DecoderError::InvariantViolation(
                    "retire_prior_to exceeds sequence_number",
                ));
            }

            let (connection_id, buffer) = buffer.decode::<ConnectionId>()?;

            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
            //# Receipt of a frame with a value of less than 1 or greater than 20
            //# MUST be treated as a connection error of type FRAME_ENCODING_ERROR.
            if connection_id.is_empty() {
                return Err(DecoderError::InvariantViolation("zero-length connection id"));
            }

            let (stateless_reset_token, buffer) = buffer.decode::<StatelessResetToken>()?;

            let frame = NewConnectionId {
                sequence_number,
                retire_prior_to,
                connection_id,
                stateless_reset_token,
            };

            Ok((frame, buffer))
        }
    }
);

impl EncoderValue for NewConnectionId {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&TAG);
        buffer.encode(&self.sequence_number);
        buffer.encode(&self.retire_prior_to);
        buffer.encode(&self.connection_id);
        buffer.encode(&self.stateless_reset_token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use quell_codec::{DecoderBuffer, EncoderBuffer};

    #[test]
    fn round_trip_test() {
        let frame = NewConnectionId {
            sequence_number: VarInt::from_u8(7),
            retire_prior_to: VarInt::from_u8(3),
            connection_id: ConnectionId::try_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap(),
            stateless_reset_token: StatelessResetToken::new([0xab; 16]),
        };

        let mut buffer = [0u8; 64];
        let len = {
            let mut encoder = EncoderBuffer::new(&mut buffer);
            encoder.encode(&frame);
            encoder.len()
        };

        let (decoded, remaining) = Frame::decode(DecoderBuffer::new(&buffer[..len])).unwrap();
        assert!(remaining.is_empty());
        assert_eq!(decoded, Frame::NewConnectionId(frame));
    }

    #[test]
    fn retire_prior_to_bound_test() {
        let bytes = [
            TAG, 0x01, // sequence number 1
            0x02, // retire prior to 2 (invalid)
            0x01, 0xff, // connection id
            0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, // token
        ];
        assert!(Frame::decode(DecoderBuffer::new(&bytes)).is_err());
    }
}
