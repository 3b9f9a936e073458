// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.13
//# A sender SHOULD send a STREAM_DATA_BLOCKED frame (type=0x15) when it
//# wishes to send data but is unable to do so due to stream-level flow
//# control.

pub(crate) const TAG: u8 = 0x15;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.13
//# STREAM_DATA_BLOCKED Frame {
//#   Type (i) = 0x15,
//#   Stream ID (i),
//#   Maximum Stream Data (i),
//# }

#[derive(Debug, PartialEq, Eq)]
pub struct StreamDataBlocked {
    /// The blocked stream
    pub stream_id: VarInt,

    /// The stream-level offset at which blocking occurred
    pub stream_data_limit: VarInt,
}

impl StreamDataBlocked {
    pub const fn tag(&self) -> Tag {
        TAG
    }
}

crate::frame::simple_frame_codec!(
    StreamDataBlocked {
        stream_id,
        stream_data_limit
    },
    TAG
);
