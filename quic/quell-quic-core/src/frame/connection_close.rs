// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};
use quell_codec::{decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.19
//# An endpoint sends a CONNECTION_CLOSE frame (type=0x1c or 0x1d) to
//# notify its peer that the connection is being closed.  The
//# CONNECTION_CLOSE frame with a type of 0x1c is used to signal errors
//# at only the QUIC layer, or the absence of errors (with the NO_ERROR
//# code).  The CONNECTION_CLOSE frame with a type of 0x1d is used to
//# signal an error with the application that uses QUIC.

const TRANSPORT_TAG: u8 = 0x1c;
const APPLICATION_TAG: u8 = 0x1d;

macro_rules! tag {
    () => {
        0x1cu8..=0x1du8
    };
}
pub(crate) use tag;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.19
//# CONNECTION_CLOSE Frame {
//#   Type (i) = 0x1c..0x1d,
//#   Error Code (i),
//#   [Frame Type (i)],
//#   Reason Phrase Length (i),
//#   Reason Phrase (..),
//# }

#[derive(Debug, PartialEq, Eq)]
pub struct ConnectionClose<'a> {
    /// The error code, from the transport or application space depending on
    /// the frame variant
    pub error_code: VarInt,

    /// The type of the frame that triggered the error; present only in the
    /// 0x1c variant
    pub frame_type: Option<VarInt>,

    /// Additional diagnostic information, not necessarily valid UTF-8
    pub reason: &'a [u8],
}

impl<'a> ConnectionClose<'a> {
    #[inline]
    pub fn tag(&self) -> Tag {
        if self.frame_type.is_some() {
            TRANSPORT_TAG
        } else {
            APPLICATION_TAG
        }
    }

    /// Returns true for the 0x1d variant carrying an application error
    #[inline]
    pub fn is_application_error(&self) -> bool {
        self.frame_type.is_none()
    }

    /// Returns the reason phrase as a string, dropping invalid bytes
    #[inline]
    pub fn reason_lossy(&self) -> &str {
        core::str::from_utf8(self.reason).unwrap_or("")
    }
}

decoder_parameterized_value!(
    impl<'a> ConnectionClose<'a> {
        fn decode(tag: Tag, buffer: Buffer) -> Result<Self> {
            let (error_code, buffer) = buffer.decode()?;

            let (frame_type, buffer) = if tag == TRANSPORT_TAG {
                let (frame_type, buffer) = buffer.decode()?;
                (Some(frame_type), buffer)
            } else {
                (None, buffer)
            };

            let (reason, buffer) = buffer.decode_slice_with_len_prefix::<VarInt>()?;
            let reason = reason.into_less_safe_slice();

            let frame = ConnectionClose {
                error_code,
                frame_type,
                reason,
            };

            Ok((frame, buffer))
        }
    }
);

impl<'a> EncoderValue for ConnectionClose<'a> {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&self.tag());
        buffer.encode(&self.error_code);

        if let Some(frame_type) = &self.frame_type {
            buffer.encode(frame_type);
        }

        buffer.encode_with_len_prefix::<VarInt, _>(&self.reason);
    }
}

impl<'a> From<crate::transport::Error> for ConnectionClose<'a> {
    fn from(error: crate::transport::Error) -> Self {
        if let Some(application_error) = error.application_error_code() {
            // only errors produced by the transport carry a frame type; an
            // application close uses the 0x1d variant
            let _ = application_error;
            ConnectionClose {
                error_code: error.code,
                frame_type: None,
                reason: error.reason.as_bytes(),
            }
        } else {
            ConnectionClose {
                error_code: error.code,
                frame_type: error.frame_type,
                reason: error.reason.as_bytes(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use quell_codec::{DecoderBuffer, EncoderBuffer};

    #[test]
    fn variant_round_trip_test() {
        for frame_type in [Some(VarInt::from_u8(0x08)), None] {
            let frame = ConnectionClose {
                error_code: VarInt::from_u8(0x3),
                frame_type,
                reason: b"flow control violated",
            };

            let mut buffer = [0u8; 64];
            let len = {
                let mut encoder = EncoderBuffer::new(&mut buffer);
                encoder.encode(&frame);
                encoder.len()
            };
            assert_eq!(
                buffer[0],
                if frame_type.is_some() {
                    TRANSPORT_TAG
                } else {
                    APPLICATION_TAG
                }
            );

            let (decoded, remaining) = Frame::decode(DecoderBuffer::new(&buffer[..len])).unwrap();
            assert!(remaining.is_empty());
            assert_eq!(decoded, Frame::ConnectionClose(frame));
        }
    }
}
