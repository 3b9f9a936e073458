// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::Tag;
use quell_codec::{decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.1
//# A PADDING frame (type=0x00) has no semantic value.  PADDING frames
//# can be used to increase the size of a packet.

pub(crate) const TAG: u8 = 0x00;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.1
//# PADDING Frame {
//#   Type (i) = 0x00,
//# }

/// A run of one or more PADDING frames
#[derive(Debug, PartialEq, Eq)]
pub struct Padding {
    /// The total length of the run, including the tag byte consumed by the
    /// frame dispatcher
    pub length: usize,
}

impl Padding {
    pub const fn tag(&self) -> Tag {
        TAG
    }
}

decoder_parameterized_value!(
    impl<'a> Padding {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            // consume the rest of the padding run in one frame
            let mut length = 1;
            let mut buffer = buffer;
            while buffer.peek_byte(0) == Ok(TAG) {
                buffer = buffer.skip(1)?;
                length += 1;
            }

            Ok((Padding { length }, buffer))
        }
    }
);

impl EncoderValue for Padding {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.write_repeated(self.length, TAG)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use quell_codec::DecoderBuffer;

    #[test]
    fn run_is_consumed_as_one_frame() {
        let bytes = [0u8, 0, 0, 0, 0x01];
        let (frame, remaining) = Frame::decode(DecoderBuffer::new(&bytes)).unwrap();
        assert_eq!(frame, Frame::Padding(Padding { length: 4 }));
        let (frame, remaining) = Frame::decode(remaining).unwrap();
        assert_eq!(frame, Frame::Ping(crate::frame::Ping));
        assert!(remaining.is_empty());
    }
}
