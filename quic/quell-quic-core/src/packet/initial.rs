// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    connection::ConnectionId,
    crypto::{packet_protection, HeaderKey, Key},
    packet::{
        long,
        number::{PacketNumber, PacketNumberSpace, TruncatedPacketNumber},
    },
    varint::VarInt,
};
use core::ops::Range;
use quell_codec::{Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.2
//# An Initial packet uses long headers with a type value of 0x00.  It
//# carries the first CRYPTO frames sent by the client and server to
//# perform key exchange, and it carries acknowledgments in ACK frames.

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.2
//# Initial Packet {
//#   Header Form (1) = 1,
//#   Fixed Bit (1) = 1,
//#   Long Packet Type (2) = 0,
//#   Reserved Bits (2),
//#   Packet Number Length (2),
//#   Version (32),
//#   Destination Connection ID Length (8),
//#   Destination Connection ID (0..160),
//#   Source Connection ID Length (8),
//#   Source Connection ID (0..160),
//#   Token Length (i),
//#   Token (..),
//#   Length (i),
//#   Packet Number (8..32),
//#   Packet Payload (8..),
//# }

/// An Initial packet with header protection still applied
pub struct ProtectedInitial<'a> {
    pub header: long::Header,
    /// Byte range of the retry token within `packet`
    pub(crate) token: Range<usize>,
    /// Offset of the packet number field
    pub(crate) header_len: usize,
    pub(crate) packet: &'a mut [u8],
}

impl<'a> core::fmt::Debug for ProtectedInitial<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("ProtectedInitial")
            .field("header", &self.header)
            .field("len", &self.packet.len())
            .finish()
    }
}

impl<'a> ProtectedInitial<'a> {
    #[inline]
    pub fn token(&self) -> &[u8] {
        &self.packet[self.token.clone()]
    }

    /// Removes header protection, expanding the packet number against the
    /// largest received in the Initial space
    pub fn unprotect<K: HeaderKey + ?Sized>(
        mut self,
        key: &K,
        largest_packet_number: PacketNumber,
    ) -> Result<EncryptedInitial<'a>, packet_protection::Error> {
        let (packet_number, packet_number_len) = long::unprotect(
            PacketNumberSpace::Initial,
            key,
            self.packet,
            self.header_len,
            largest_packet_number,
        )?;

        Ok(EncryptedInitial {
            header: self.header,
            token: self.token,
            header_len: self.header_len,
            packet_number,
            packet_number_len,
            packet: self.packet,
        })
    }
}

/// An Initial packet with the packet number exposed but the payload still
/// encrypted
pub struct EncryptedInitial<'a> {
    pub header: long::Header,
    token: Range<usize>,
    header_len: usize,
    pub packet_number: PacketNumber,
    packet_number_len: usize,
    packet: &'a mut [u8],
}

impl<'a> EncryptedInitial<'a> {
    /// Authenticates and decrypts the payload in place
    pub fn decrypt<K: Key + ?Sized>(
        self,
        key: &K,
    ) -> Result<CleartextInitial<'a>, packet_protection::Error> {
        let payload_len = long::decrypt(
            key,
            self.packet,
            self.header_len,
            self.packet_number_len,
            self.packet_number,
        )?;

        let (header, payload) = self
            .packet
            .split_at_mut(self.header_len + self.packet_number_len);
        let header: &'a [u8] = header;
        let payload: &'a [u8] = payload;

        Ok(CleartextInitial {
            header: self.header,
            token: &header[self.token],
            packet_number: self.packet_number,
            payload: &payload[..payload_len],
        })
    }
}

/// A fully decrypted Initial packet
pub struct CleartextInitial<'a> {
    pub header: long::Header,
    pub token: &'a [u8],
    pub packet_number: PacketNumber,
    pub payload: &'a [u8],
}

/// Writes an Initial header up to (but excluding) the Length field
#[inline]
pub fn encode_header<E: Encoder>(
    encoder: &mut E,
    version: u32,
    destination_connection_id: &ConnectionId,
    source_connection_id: &ConnectionId,
    token: &[u8],
    packet_number: TruncatedPacketNumber,
) {
    long::encode_header(
        encoder,
        long::PacketType::Initial,
        version,
        destination_connection_id,
        source_connection_id,
        packet_number,
    );
    encoder.encode_with_len_prefix::<VarInt, _>(&token);
}
