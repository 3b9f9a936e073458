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

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.3
//# A 0-RTT packet uses long headers with a type value of 0x01, followed
//# by the Length and Packet Number fields; see Section 17.2.  The first
//# byte contains the Reserved and Packet Number Length bits; see
//# Section 17.2.  A 0-RTT packet is used to carry "early" data from the
//# client to the server as part of the first flight, prior to handshake
//# completion.

/// A 0-RTT packet with header protection still applied
pub struct ProtectedZeroRtt<'a> {
    pub header: long::Header,
    pub(crate) header_len: usize,
    pub(crate) packet: &'a mut [u8],
}

impl<'a> core::fmt::Debug for ProtectedZeroRtt<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("ProtectedZeroRtt")
            .field("header", &self.header)
            .field("len", &self.packet.len())
            .finish()
    }
}

impl<'a> ProtectedZeroRtt<'a> {
    /// Removes header protection, expanding the packet number against the
    /// largest received in the application space
    pub fn unprotect<K: HeaderKey + ?Sized>(
        self,
        key: &K,
        largest_packet_number: PacketNumber,
    ) -> Result<EncryptedZeroRtt<'a>, packet_protection::Error> {
        let (packet_number, packet_number_len) = long::unprotect(
            PacketNumberSpace::ApplicationData,
            key,
            self.packet,
            self.header_len,
            largest_packet_number,
        )?;

        Ok(EncryptedZeroRtt {
            header: self.header,
            header_len: self.header_len,
            packet_number,
            packet_number_len,
            packet: self.packet,
        })
    }
}

/// A 0-RTT packet with the packet number exposed but the payload still
/// encrypted
pub struct EncryptedZeroRtt<'a> {
    pub header: long::Header,
    header_len: usize,
    pub packet_number: PacketNumber,
    packet_number_len: usize,
    packet: &'a mut [u8],
}

impl<'a> EncryptedZeroRtt<'a> {
    /// Authenticates and decrypts the payload in place
    pub fn decrypt<K: Key + ?Sized>(
        self,
        key: &K,
    ) -> Result<CleartextZeroRtt<'a>, packet_protection::Error> {
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

        Ok(CleartextZeroRtt {
            header: self.header,
            packet_number: self.packet_number,
            payload: &payload[..payload_len],
        })
    }
}

/// A fully decrypted 0-RTT packet
pub struct CleartextZeroRtt<'a> {
    pub header: long::Header,
    pub packet_number: PacketNumber,
    pub payload: &'a [u8],
}

/// Writes a 0-RTT header up to (but excluding) the Length field
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
        long::PacketType::ZeroRtt,
        version,
        destination_connection_id,
        source_connection_id,
        packet_number,
    );
}
