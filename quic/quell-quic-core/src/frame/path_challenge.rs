// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::frame::Tag;
use quell_codec::{decoder_parameterized_value, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.17
//# Endpoints can use PATH_CHALLENGE frames (type=0x1a) to check
//# reachability to the peer and for path validation during connection
//# migration.

pub(crate) const TAG: u8 = 0x1a;

pub const DATA_LEN: usize = 8;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.17
//# PATH_CHALLENGE Frame {
//#   Type (i) = 0x1a,
//#   Data (64),
//# }

#[derive(Debug, PartialEq, Eq)]
pub struct PathChallenge {
    /// 8 bytes of unpredictable data, echoed in a PATH_RESPONSE
    pub data: [u8; DATA_LEN],
}

impl PathChallenge {
    pub const fn tag(&self) -> Tag {
        TAG
    }
}

decoder_parameterized_value!(
    impl<'a> PathChallenge {
        fn decode(_tag: Tag, buffer: Buffer) -> Result<Self> {
            let (data, buffer) = buffer.decode_slice(DATA_LEN)?;
            let mut bytes = [0; DATA_LEN];
            bytes.copy_from_slice(data.as_less_safe_slice());
            Ok((PathChallenge { data: bytes }, buffer))
        }
    }
);

impl EncoderValue for PathChallenge {
    #[inline]
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        buffer.encode(&TAG);
        buffer.write_slice(&self.data);
    }
}
