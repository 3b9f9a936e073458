// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    connection::ConnectionId,
    crypto::{self, packet_protection, HeaderKey, Key},
    packet::{
        long,
        number::{PacketNumber, PacketNumberSpace, TruncatedPacketNumber},
    },
};
use quell_codec::{Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.3.1
//# A 1-RTT packet uses a short packet header.  It is used after the
//# version and 1-RTT keys are negotiated.
//#
//# 1-RTT Packet {
//#   Header Form (1) = 0,
//#   Fixed Bit (1) = 1,
//#   Spin Bit (1),
//#   Reserved Bits (2),
//#   Key Phase (1),
//#   Packet Number Length (2),
//#   Destination Connection ID (0..160),
//#   Packet Number (8..32),
//#   Packet Payload (8..),
//# }

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.3.1
//# Key Phase:  The next bit (0x04) of byte 0 indicates the key phase,
//#    which allows a recipient of a packet to identify the packet
//#    protection keys that are used to protect the packet.
const KEY_PHASE_BIT: u8 = 0x04;

/// The key phase bit of a 1-RTT packet, toggled by each key update
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum KeyPhase {
    #[default]
    Zero,
    One,
}

impl KeyPhase {
    #[inline]
    pub fn from_tag(tag: u8) -> Self {
        if tag & KEY_PHASE_BIT == KEY_PHASE_BIT {
            Self::One
        } else {
            Self::Zero
        }
    }

    #[inline]
    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Zero => Self::One,
            Self::One => Self::Zero,
        }
    }

    #[inline]
    fn into_bit(self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::One => KEY_PHASE_BIT,
        }
    }
}

/// A 1-RTT packet with header protection still applied
pub struct ProtectedShort<'a> {
    pub destination_connection_id: ConnectionId,
    pub(crate) header_len: usize,
    pub(crate) packet: &'a mut [u8],
}

impl<'a> core::fmt::Debug for ProtectedShort<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("ProtectedShort")
            .field(
                "destination_connection_id",
                &self.destination_connection_id,
            )
            .field("len", &self.packet.len())
            .finish()
    }
}

impl<'a> ProtectedShort<'a> {
    /// Removes header protection, exposing the packet number and key phase
    pub fn unprotect<K: HeaderKey + ?Sized>(
        self,
        key: &K,
        largest_packet_number: PacketNumber,
    ) -> Result<EncryptedShort<'a>, packet_protection::Error> {
        let truncated = crypto::remove_header_protection(
            PacketNumberSpace::ApplicationData,
            key,
            self.packet,
            self.header_len,
        )?;
        let packet_number = truncated.expand(largest_packet_number);

        Ok(EncryptedShort {
            destination_connection_id: self.destination_connection_id,
            key_phase: KeyPhase::from_tag(self.packet[0]),
            header_len: self.header_len,
            packet_number,
            packet_number_len: truncated.len().bytesize(),
            packet: self.packet,
        })
    }
}

/// A 1-RTT packet with the packet number and key phase exposed but the
/// payload still encrypted
pub struct EncryptedShort<'a> {
    pub destination_connection_id: ConnectionId,
    pub key_phase: KeyPhase,
    header_len: usize,
    pub packet_number: PacketNumber,
    packet_number_len: usize,
    packet: &'a mut [u8],
}

impl<'a> EncryptedShort<'a> {
    /// Authenticates and decrypts the payload in place
    pub fn decrypt<K: Key + ?Sized>(
        mut self,
        key: &K,
    ) -> Result<CleartextShort<'a>, packet_protection::Error> {
        let payload_len = self.decrypt_in_place(key)?;
        Ok(self.into_cleartext(payload_len))
    }

    /// Attempts decryption without consuming the packet, so a failure
    /// against one key generation can be retried against another after
    /// restoring the ciphertext
    pub fn decrypt_in_place<K: Key + ?Sized>(
        &mut self,
        key: &K,
    ) -> Result<usize, packet_protection::Error> {
        long::decrypt(
            key,
            self.packet,
            self.header_len,
            self.packet_number_len,
            self.packet_number,
        )
    }

    /// A copy of the (still encrypted) payload, for restoring after a
    /// failed in-place decryption
    pub fn payload_copy(&self) -> alloc::vec::Vec<u8> {
        self.packet[self.header_len + self.packet_number_len..].to_vec()
    }

    /// Restores a payload saved with [`Self::payload_copy`]
    pub fn restore_payload(&mut self, saved: &[u8]) {
        self.packet[self.header_len + self.packet_number_len..].copy_from_slice(saved);
    }

    /// Finalizes a successful in-place decryption
    pub fn into_cleartext(self, payload_len: usize) -> CleartextShort<'a> {
        let (_, payload) = self
            .packet
            .split_at_mut(self.header_len + self.packet_number_len);
        let payload: &'a [u8] = payload;

        CleartextShort {
            destination_connection_id: self.destination_connection_id,
            key_phase: self.key_phase,
            packet_number: self.packet_number,
            payload: &payload[..payload_len],
        }
    }
}

/// A fully decrypted 1-RTT packet
pub struct CleartextShort<'a> {
    pub destination_connection_id: ConnectionId,
    pub key_phase: KeyPhase,
    pub packet_number: PacketNumber,
    pub payload: &'a [u8],
}

/// Writes a short header including the packet number
#[inline]
pub fn encode_header<E: Encoder>(
    encoder: &mut E,
    destination_connection_id: &ConnectionId,
    key_phase: KeyPhase,
    packet_number: TruncatedPacketNumber,
) {
    let first = long::FIXED_BIT
        | key_phase.into_bit()
        | packet_number.len().into_packet_tag_mask();
    encoder.encode(&first);
    encoder.write_slice(destination_connection_id.as_slice());
    packet_number.encode(encoder);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_phase_round_trip() {
        assert_eq!(KeyPhase::from_tag(0b0000_0100), KeyPhase::One);
        assert_eq!(KeyPhase::from_tag(0b0000_0000), KeyPhase::Zero);
        assert_eq!(KeyPhase::Zero.next(), KeyPhase::One);
        assert_eq!(KeyPhase::One.next(), KeyPhase::Zero);
    }
}
