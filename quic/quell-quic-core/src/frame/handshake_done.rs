// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::Tag;
use quell_codec::{decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.20
//# The server uses a HANDSHAKE_DONE frame (type=0x1e) to signal
//# confirmation of the handshake to the client.

pub(crate) const TAG: u8 = 0x1e;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.20
//# HANDSHAKE_DONE Frame {
//#   Type (i) = 0x1e,
//# }

#[derive(Debug, PartialEq, Eq)]
pub struct HandshakeDone;

impl HandshakeDone {
    pub const fn tag(&self) -> Tag {
        TAG
    }
}

decoder_parameterized_value!(
    impl<'a> HandshakeDone {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            Ok((HandshakeDone, buffer))
        }
    }
);

impl EncoderValue for HandshakeDone {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&TAG);
    }
}
