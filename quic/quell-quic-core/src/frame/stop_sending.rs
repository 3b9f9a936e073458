// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.5
//# An endpoint uses a STOP_SENDING frame (type=0x05) to communicate that
//# incoming data is being discarded on receipt per application request.
//# STOP_SENDING requests that a peer cease transmission on a stream.

pub(crate) const TAG: u8 = 0x05;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.5
//# STOP_SENDING Frame {
//#   Type (i) = 0x05,
//#   Stream ID (i),
//#   Application Protocol Error Code (i),
//# }

#[derive(Debug, PartialEq, Eq)]
pub struct StopSending {
    /// The stream being ignored
    pub stream_id: VarInt,

    /// The application-defined reason for ignoring the stream
    pub application_error_code: VarInt,
}

impl StopSending {
    pub const fn tag(&self) -> Tag {
        TAG
    }
}

crate::frame::simple_frame_codec!(
    StopSending {
        stream_id,
        application_error_code
    },
    TAG
);
