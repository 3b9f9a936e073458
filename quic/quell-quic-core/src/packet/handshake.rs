// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    connection::ConnectionId,
    crypto::{packet_protection, HeaderKey, Key},
    packet::{
        long,
        number::{PacketNumber, PacketNumberSpace, TruncatedPacketNumber},
    },
};
use quell_codec::Encoder;

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.4
//# A Handshake packet uses long headers with a type value of 0x02,
//# followed by the Length and Packet Number fields; see Section 17.2.
//# The first byte contains the Reserved and Packet Number Length bits;
//# see Section 17.2.  It is used to carry cryptographic handshake
//# messages and acknowledgments from the server and client.

/// A Handshake packet with header protection still applied
pub struct ProtectedHandshake<'a> {
    pub header: long::Header,
    pub(crate) header_len: usize,
    pub(crate) packet: &'a mut [u8],
}

impl<'a> core::fmt::Debug for ProtectedHandshake<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("ProtectedHandshake")
            .field("header", &self.header)
            .field("len", &self.packet.len())
            .finish()
    }
}

impl<'a> ProtectedHandshake<'a> {
    /// Removes header protection, expanding the packet number against the
    /// largest received in the Handshake space
    pub fn unprotect<K: HeaderKey + ?Sized>(
        self,
        key: &K,
        largest_packet_number: PacketNumber,
    ) -> Result<EncryptedHandshake<'a>, packet_protection::Error> {
        let (packet_number, packet_number_len) = long::unprotect(
            PacketNumberSpace::Handshake,
            key,
            self.packet,
            self.header_len,
            largest_packet_number,
        )?;

        Ok(EncryptedHandshake {
            header: self.header,
            header_len: self.header_len,
            packet_number,
            packet_number_len,
            packet: self.packet,
        })
    }
}

/// A Handshake packet with the packet number exposed but the payload still
/// encrypted
pub struct EncryptedHandshake<'a> {
    pub header: long::Header,
    header_len: usize,
    pub packet_number: PacketNumber,
    packet_number_len: usize,
    packet: &'a mut [u8],
}

impl<'a> EncryptedHandshake<'a> {
    /// Authenticates and decrypts the payload in place
    pub fn decrypt<K: Key + ?Sized>(
        self,
        key: &K,
    ) -> Result<CleartextHandshake<'a>, packet_protection::Error> {
        let payload_len = long::decrypt(
            key,
            self.packet,
            self.header_len,
            self.packet_number_len,
            self.packet_number,
        )?;

        let (_, payload) = self
            .packet
            .split_at_mut(self.header_len + self.packet_number_len);
        let payload: &'a [u8] = payload;

        Ok(CleartextHandshake {
            header: self.header,
            packet_number: self.packet_number,
            payload: &payload[..payload_len],
        })
    }
}

/// A fully decrypted Handshake packet
pub struct CleartextHandshake<'a> {
    pub header: long::Header,
    pub packet_number: PacketNumber,
    pub payload: &'a [u8],
}

/// Writes a Handshake header up to (but excluding) the Length field
#[inline]
pub fn encode_header<E: Encoder>(
    encoder: &mut E,
    version: u32,
    destination_connection_id: &ConnectionId,
    source_connection_id: &ConnectionId,
    packet_number: TruncatedPacketNumber,
) {
    long::encode_header(
        encoder,
        long::PacketType::Handshake,
        version,
        destination_connection_id,
        source_connection_id,
        packet_number,
    );
}
