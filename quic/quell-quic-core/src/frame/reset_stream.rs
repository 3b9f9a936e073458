// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.4
//# An endpoint uses a RESET_STREAM frame (type=0x04) to abruptly
//# terminate the sending part of a stream.

pub(crate) const TAG: u8 = 0x04;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.4
//# RESET_STREAM Frame {
//#   Type (i) = 0x04,
//#   Stream ID (i),
//#   Application Protocol Error Code (i),
//#   Final Size (i),
//# }

#[derive(Debug, PartialEq, Eq)]
pub struct ResetStream {
    /// The stream being terminated
    pub stream_id: VarInt,

    /// The application-defined reason for closing the stream
    pub application_error_code: VarInt,

    /// The final size of the stream in bytes
    pub final_size: VarInt,
}

impl ResetStream {
    pub const fn tag(&self) -> Tag {
        TAG
    }
}

crate::frame::simple_frame_codec!(
    ResetStream {
        stream_id,
        application_error_code,
        final_size
    },
    TAG
);
