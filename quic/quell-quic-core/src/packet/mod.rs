// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! QUIC packet header codecs
//!
//! Decoding produces a `ProtectedPacket`: header fields are parsed but the
//! first byte, packet number and payload are still protected. Header
//! protection removal and AEAD decryption then step the packet through
//! `unprotect` and `decrypt` on the per-type structs.

pub mod handshake;
pub mod initial;
pub mod long;
pub mod number;
pub mod retry;
pub mod short;
pub mod version_negotiation;
pub mod zero_rtt;

use crate::connection::ConnectionId;
use core::ops::Range;
use quell_codec::{decoder_invariant, DecoderBuffer, DecoderBufferMut, DecoderError};

pub use handshake::ProtectedHandshake;
pub use initial::ProtectedInitial;
pub use retry::ProtectedRetry;
pub use short::{KeyPhase, ProtectedShort};
pub use version_negotiation::VersionNegotiation;
pub use zero_rtt::ProtectedZeroRtt;

//= https://www.rfc-editor.org/rfc/rfc9000#section-12.2
//# Senders can coalesce multiple QUIC packets into one UDP datagram.

/// One packet split out of a (possibly coalesced) datagram, with header
/// protection still applied
#[derive(Debug)]
pub enum ProtectedPacket<'a> {
    Initial(ProtectedInitial<'a>),
    Handshake(ProtectedHandshake<'a>),
    ZeroRtt(ProtectedZeroRtt<'a>),
    Short(ProtectedShort<'a>),
    Retry(ProtectedRetry<'a>),
    VersionNegotiation(VersionNegotiation),
}

/// The outcome of parsing a packet's header fields, before the packet is
/// split out of the datagram
enum Parsed {
    Long {
        packet_type: long::PacketType,
        header: long::Header,
        /// byte range of the token within the packet (Initial and Retry)
        token: Range<usize>,
        /// offset of the packet number field
        header_len: usize,
        /// total length of this packet within the datagram
        packet_len: usize,
    },
    Short {
        destination_connection_id: ConnectionId,
        header_len: usize,
        packet_len: usize,
    },
    VersionNegotiation(VersionNegotiation),
}

impl<'a> ProtectedPacket<'a> {
    /// Splits one packet off the front of `buffer`.
    ///
    /// `destination_cid_len` is the length of connection ids this endpoint
    /// issues, required to parse short headers. Returns the packet and the
    /// rest of the datagram.
    pub fn decode(
        mut buffer: DecoderBufferMut<'a>,
        destination_cid_len: usize,
    ) -> Result<(ProtectedPacket<'a>, DecoderBufferMut<'a>), DecoderError> {
        let parsed = {
            let view = DecoderBuffer::new(&*buffer.as_less_safe_slice_mut());
            parse(view, destination_cid_len)?
        };

        match parsed {
            Parsed::Long {
                packet_type,
                header,
                token,
                header_len,
                packet_len,
            } => {
                let (packet, remaining) = buffer.decode_slice(packet_len)?;
                let packet = packet.into_less_safe_slice();

                let packet = match packet_type {
                    long::PacketType::Initial => ProtectedPacket::Initial(ProtectedInitial {
                        header,
                        token,
                        header_len,
                        packet,
                    }),
                    long::PacketType::Handshake => {
                        ProtectedPacket::Handshake(ProtectedHandshake {
                            header,
                            header_len,
                            packet,
                        })
                    }
                    long::PacketType::ZeroRtt => ProtectedPacket::ZeroRtt(ProtectedZeroRtt {
                        header,
                        header_len,
                        packet,
                    }),
                    long::PacketType::Retry => ProtectedPacket::Retry(ProtectedRetry {
                        header,
                        token,
                        packet,
                    }),
                };

                Ok((packet, remaining))
            }
            Parsed::Short {
                destination_connection_id,
                header_len,
                packet_len,
            } => {
                let (packet, remaining) = buffer.decode_slice(packet_len)?;
                let packet = packet.into_less_safe_slice();

                Ok((
                    ProtectedPacket::Short(ProtectedShort {
                        destination_connection_id,
                        header_len,
                        packet,
                    }),
                    remaining,
                ))
            }
            Parsed::VersionNegotiation(packet) => {
                let len = buffer.len();
                let (_, remaining) = buffer.decode_slice(len)?;
                Ok((ProtectedPacket::VersionNegotiation(packet), remaining))
            }
        }
    }

    /// The destination connection id carried in the header
    pub fn destination_connection_id(&self) -> &ConnectionId {
        match self {
            Self::Initial(packet) => &packet.header.destination_connection_id,
            Self::Handshake(packet) => &packet.header.destination_connection_id,
            Self::ZeroRtt(packet) => &packet.header.destination_connection_id,
            Self::Short(packet) => &packet.destination_connection_id,
            Self::Retry(packet) => &packet.header.destination_connection_id,
            Self::VersionNegotiation(packet) => &packet.destination_connection_id,
        }
    }
}

fn parse(view: DecoderBuffer, destination_cid_len: usize) -> Result<Parsed, DecoderError> {
    let datagram_len = view.len();
    let first = view.peek_byte(0)?;

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
    //# Header Form:  The most significant bit (0x80) of byte 0 (the first
    //#    byte) is set to 1 for long headers.
    if first & long::FORM_BIT == 0 {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-17.3.1
        //# Fixed Bit:  The next bit (0x40) of byte 0 is set to 1.  Packets
        //#    containing a zero value for this bit are not valid packets in this
        //#    version and MUST be dropped.
        decoder_invariant!(first & long::FIXED_BIT != 0, "fixed bit not set");

        let remaining = view.skip(1)?;
        let (destination_connection_id, _) = remaining.decode_slice(destination_cid_len)?;
        let destination_connection_id =
            ConnectionId::try_from_slice(destination_connection_id.into_less_safe_slice())
                .map_err(|_| DecoderError::InvariantViolation("invalid connection id"))?;

        let header_len = 1 + destination_cid_len;
        decoder_invariant!(datagram_len > header_len, "short packet has no payload");

        return Ok(Parsed::Short {
            destination_connection_id,
            header_len,
            // short headers consume the rest of the datagram
            packet_len: datagram_len,
        });
    }

    let remaining = view.skip(1)?;
    let (version, remaining) = remaining.decode::<u32>()?;

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.1
    //# A Version Negotiation packet is inherently not version specific.
    //# Upon receipt by a client, it will be identified as a Version
    //# Negotiation packet based on the Version field having a value of 0.
    if version == 0 {
        return version_negotiation::parse(remaining).map(Parsed::VersionNegotiation);
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
    //# Fixed Bit:  The next bit (0x40) of byte 0 is set to 1, unless the
    //#    packet is a Version Negotiation packet.  Packets containing a
    //#    zero value for this bit are not valid packets in this version and
    //#    MUST be dropped.
    decoder_invariant!(first & long::FIXED_BIT != 0, "fixed bit not set");

    let (destination_connection_id, remaining) = remaining.decode::<ConnectionId>()?;
    let (source_connection_id, remaining) = remaining.decode::<ConnectionId>()?;

    let header = long::Header {
        version,
        destination_connection_id,
        source_connection_id,
    };

    let packet_type = long::PacketType::from_tag(first);

    let (token, remaining) = match packet_type {
        long::PacketType::Initial => {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.2
            //# Token Length:  A variable-length integer specifying the length of
            //#    the Token field, in bytes.
            let (token, remaining) =
                remaining.decode_slice_with_len_prefix::<crate::varint::VarInt>()?;
            let token_end = datagram_len - remaining.len();
            let token_start = token_end - token.len();
            (token_start..token_end, remaining)
        }
        long::PacketType::Retry => {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.5
            //# Retry Token:  An opaque token that the server can use to validate
            //#    the client's address.
            // the token extends to the integrity tag at the end of the
            // datagram
            let token_start = datagram_len - remaining.len();
            decoder_invariant!(
                remaining.len() >= retry::INTEGRITY_TAG_LEN,
                "retry packet too short"
            );
            let token_end = datagram_len - retry::INTEGRITY_TAG_LEN;
            return Ok(Parsed::Long {
                packet_type,
                header,
                token: token_start..token_end,
                header_len: token_end,
                packet_len: datagram_len,
            });
        }
        _ => (0..0, remaining),
    };

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2
    //# Length:  The length of the remainder of the packet (that is, the
    //#    Packet Number and Payload fields) in bytes, encoded as a
    //#    variable-length integer (Section 16).
    let (length, remaining) = remaining.decode::<crate::varint::VarInt>()?;
    let length = usize::try_from(length.as_u64())
        .map_err(|_| DecoderError::LengthCapacityExceeded)?;

    let header_len = datagram_len - remaining.len();
    let packet_len = header_len
        .checked_add(length)
        .ok_or(DecoderError::LengthCapacityExceeded)?;
    decoder_invariant!(packet_len <= datagram_len, "packet length exceeds datagram");

    Ok(Parsed::Long {
        packet_type,
        header,
        token,
        header_len,
        packet_len,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_bit_must_be_set_test() {
        // long header with the fixed bit cleared
        let mut bytes = [0x80u8, 0, 0, 0, 1, 0, 0];
        let buffer = DecoderBufferMut::new(&mut bytes);
        assert!(ProtectedPacket::decode(buffer, 0).is_err());
    }

    #[test]
    fn truncated_header_test() {
        let mut bytes = [0xc0u8, 0, 0];
        let buffer = DecoderBufferMut::new(&mut bytes);
        assert!(ProtectedPacket::decode(buffer, 0).is_err());
    }

    #[test]
    fn length_exceeding_datagram_test() {
        // initial packet claiming a length beyond the datagram
        let mut bytes = [
            0xc0u8, 0, 0, 0, 1, // version
            0,    // dcid len
            0,    // scid len
            0,    // token len
            0x40, 200, // length = 200
            0, 0, 0, 0,
        ];
        let buffer = DecoderBufferMut::new(&mut bytes);
        assert!(ProtectedPacket::decode(buffer, 0).is_err());
    }
}
