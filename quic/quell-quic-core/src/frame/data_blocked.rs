// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{frame::Tag, varint::VarInt};

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.12
//# A sender SHOULD send a DATA_BLOCKED frame (type=0x14) when it wishes
//# to send data but is unable to do so due to connection-level flow
//# control.

pub(crate) const TAG: u8 = 0x14;

//= https://www.rfc-editor.org/rfc/rfc9000#section-19.12
//# DATA_BLOCKED Frame {
//#   Type (i) = 0x14,
//#   Maximum Data (i),
//# }

#[derive(Debug, PartialEq, Eq)]
pub struct DataBlocked {
    /// The connection-level limit at which blocking occurred
    pub data_limit: VarInt,
}

impl DataBlocked {
    pub const fn tag(&self) -> Tag {
        TAG
    }
}

crate::frame::simple_frame_codec!(DataBlocked { data_limit }, TAG);
