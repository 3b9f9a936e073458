// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{connection::ConnectionId, packet::long};
use core::ops::Range;
use quell_codec::{Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.5
//# A Retry packet uses a long packet header with a type value of 0x03.
//# It carries an address validation token created by the server.  It is
//# used by a server that wishes to perform a retry; see Section 8.1.
//
//# Retry Packet {
//#   Header Form (1) = 1,
//#   Fixed Bit (1) = 1,
//#   Long Packet Type (2) = 3,
//#   Unused (4),
//#   Version (32),
//#   Destination Connection ID Length (8),
//#   Destination Connection ID (0..160),
//#   Source Connection ID Length (8),
//#   Source Connection ID (0..160),
//#   Retry Token (..),
//#   Retry Integrity Tag (128),
//# }

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.8
//# The Retry Integrity Tag is a 128-bit field
pub const INTEGRITY_TAG_LEN: usize = 16;

pub type IntegrityTag = [u8; INTEGRITY_TAG_LEN];

/// A Retry packet.
///
/// Retry packets carry no packet number and no protected payload; the
/// integrity tag is validated with the fixed retry key by the crypto crate.
pub struct ProtectedRetry<'a> {
    pub header: long::Header,
    /// Byte range of the retry token within `packet`
    pub(crate) token: Range<usize>,
    pub(crate) packet: &'a mut [u8],
}

impl<'a> core::fmt::Debug for ProtectedRetry<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("ProtectedRetry")
            .field("header", &self.header)
            .field("token_len", &self.token.len())
            .finish()
    }
}

impl<'a> ProtectedRetry<'a> {
    #[inline]
    pub fn token(&self) -> &[u8] {
        &self.packet[self.token.clone()]
    }

    /// The integrity tag at the end of the packet
    #[inline]
    pub fn integrity_tag(&self) -> IntegrityTag {
        let mut tag = [0; INTEGRITY_TAG_LEN];
        tag.copy_from_slice(&self.packet[self.packet.len() - INTEGRITY_TAG_LEN..]);
        tag
    }

    /// The pseudo-packet over which the integrity tag is computed: the
    /// original destination connection id prepended to the packet without
    /// its tag
    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.8
    //# Retry Pseudo-Packet {
    //#   ODCID Length (8),
    //#   Original Destination Connection ID (0..160),
    //#   Retry Packet (..),
    //# }
    pub fn pseudo_packet(&self, original_destination_connection_id: &ConnectionId) -> alloc::vec::Vec<u8> {
        let body = &self.packet[..self.packet.len() - INTEGRITY_TAG_LEN];
        let mut pseudo =
            alloc::vec::Vec::with_capacity(1 + original_destination_connection_id.len() + body.len());
        pseudo.push(original_destination_connection_id.len() as u8);
        pseudo.extend_from_slice(original_destination_connection_id.as_slice());
        pseudo.extend_from_slice(body);
        pseudo
    }
}

/// Writes a Retry packet up to (but excluding) the integrity tag
pub fn encode_header<E: Encoder>(
    encoder: &mut E,
    version: u32,
    destination_connection_id: &ConnectionId,
    source_connection_id: &ConnectionId,
    token: &[u8],
) {
    encoder.encode(&long::PacketType::Retry.first_byte(0));
    long::encode_fields(
        encoder,
        version,
        destination_connection_id,
        source_connection_id,
    );
    encoder.write_slice(token);
}

/// Builds the pseudo-packet for tag generation on the sending side
pub fn pseudo_packet(
    original_destination_connection_id: &ConnectionId,
    retry_packet_without_tag: &[u8],
) -> alloc::vec::Vec<u8> {
    let mut pseudo = alloc::vec::Vec::with_capacity(
        1 + original_destination_connection_id.len() + retry_packet_without_tag.len(),
    );
    pseudo.push(original_destination_connection_id.len() as u8);
    pseudo.extend_from_slice(original_destination_connection_id.as_slice());
    pseudo.extend_from_slice(retry_packet_without_tag);
    pseudo
}
