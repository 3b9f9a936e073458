// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::connection::ConnectionId;
use alloc::vec::Vec;
use quell_codec::{DecoderBuffer, DecoderError, Encoder, EncoderValue};

//= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.1
//# A Version Negotiation packet is sent only by servers in response to a
//# client packet that contains an unsupported version; see Section 5.2.2.
//
//# Version Negotiation Packet {
//#   Header Form (1) = 1,
//#   Unused (7),
//#   Version (32) = 0,
//#   Destination Connection ID Length (8),
//#   Destination Connection ID (0..2040),
//#   Source Connection ID Length (8),
//#   Source Connection ID (0..2040),
//#   Supported Version (32) ...,
//# }

/// A Version Negotiation packet.
///
/// Carries no protected payload; the supported versions are decoded
/// eagerly.
#[derive(Clone, Debug)]
pub struct VersionNegotiation {
    pub destination_connection_id: ConnectionId,
    pub source_connection_id: ConnectionId,
    pub supported_versions: Vec<u32>,
}

impl VersionNegotiation {
    /// Returns true if `version` is among the versions the server offered
    pub fn supports(&self, version: u32) -> bool {
        self.supported_versions.contains(&version)
    }

    /// Encodes a complete Version Negotiation packet
    pub fn encode<E: Encoder>(&self, encoder: &mut E) {
        // the form bit is set; the remaining bits are unused and SHOULD be
        // randomized by the caller's padding policy
        encoder.encode(&0x80u8);
        encoder.encode(&0u32);
        encoder.encode(&self.destination_connection_id);
        encoder.encode(&self.source_connection_id);
        for version in &self.supported_versions {
            encoder.encode(version);
        }
    }
}

/// Parses the fields following the Version field of a Version Negotiation
/// packet
pub(crate) fn parse(buffer: DecoderBuffer) -> Result<VersionNegotiation, DecoderError> {
    let (destination_connection_id, buffer) = buffer.decode::<ConnectionId>()?;
    let (source_connection_id, buffer) = buffer.decode::<ConnectionId>()?;

    let mut supported_versions = Vec::new();
    let mut buffer = buffer;
    while !buffer.is_empty() {
        let (version, remaining) = buffer.decode::<u32>()?;
        supported_versions.push(version);
        buffer = remaining;
    }

    Ok(VersionNegotiation {
        destination_connection_id,
        source_connection_id,
        supported_versions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::ProtectedPacket;
    use quell_codec::{DecoderBufferMut, EncoderBuffer};

    #[test]
    fn round_trip_test() {
        let packet = VersionNegotiation {
            destination_connection_id: ConnectionId::try_from_slice(&[1, 2, 3]).unwrap(),
            source_connection_id: ConnectionId::try_from_slice(&[4, 5]).unwrap(),
            supported_versions: alloc::vec![crate::QUIC_VERSION, 0xff00_001d],
        };

        let mut buffer = [0u8; 64];
        let len = {
            let mut encoder = EncoderBuffer::new(&mut buffer);
            packet.encode(&mut encoder);
            encoder.len()
        };

        let (decoded, remaining) =
            ProtectedPacket::decode(DecoderBufferMut::new(&mut buffer[..len]), 0).unwrap();
        assert!(remaining.is_empty());

        match decoded {
            ProtectedPacket::VersionNegotiation(decoded) => {
                assert!(decoded.supports(crate::QUIC_VERSION));
                assert_eq!(decoded.supported_versions, packet.supported_versions);
            }
            other => panic!("expected version negotiation, got {other:?}"),
        }
    }
}
