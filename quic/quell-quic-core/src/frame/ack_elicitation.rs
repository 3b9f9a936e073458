// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
//# Ack-eliciting packets:  Packets that contain ack-eliciting frames
//#    elicit an ACK from the receiver within the maximum acknowledgment
//#    delay

/// Classifies a frame or packet by whether it obligates the peer to send
/// an acknowledgment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum AckElicitation {
    #[default]
    NonEliciting,
    Eliciting,
}

impl AckElicitation {
    #[inline]
    pub fn is_ack_eliciting(self) -> bool {
        matches!(self, Self::Eliciting)
    }

    /// Merges the elicitation of two values, e.g. a packet and one of its
    /// frames
    #[inline]
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        self.max(other)
    }
}

pub trait AckElicitable {
    fn ack_elicitation(&self) -> AckElicitation;
}
