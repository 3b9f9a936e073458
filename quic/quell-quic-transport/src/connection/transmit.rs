// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Outgoing datagram composition
//!
//! One call to [`Connection::transmit`] fills at most one UDP datagram,
//! coalescing packets of ascending encryption levels. Transmission is
//! gated by the congestion window, the pacer and (on servers) the
//! anti-amplification bound; PTO probes and CONNECTION_CLOSE bypass the
//! congestion window.

use super::{Connection, PendingControl, State};
use crate::{
    cid::{LocalIdRegistry, PeerIdRegistry},
    flow::{RxWindow, TxWindow},
    handshake::CryptoStream,
    recovery::{FrameList, Retransmit},
    space::PacketSpace,
    stream::StreamManager,
};
use alloc::{collections::VecDeque, vec::Vec};
use quell_quic_core::{
    crypto::{apply_header_protection, EncryptionLevel, Key as _},
    endpoint,
    frame::{
        self, ack_elicitation::AckElicitation, ConnectionClose, Crypto, Datagram, HandshakeDone,
        MaxData, MaxStreamData, MaxStreams, NewToken, PathChallenge, PathResponse, Ping,
        ResetStream, StopSending, Stream as StreamFrame,
    },
    inet::ExplicitCongestionNotification,
    packet::{self, number::PacketNumberSpace},
    recovery::SentPacketInfo,
    time::Timestamp,
    transport,
    varint::VarInt,
    QUIC_VERSION,
};
use quell_codec::{Encoder, EncoderBuffer, EncoderValue};
use smallvec::smallvec;
use std::net::SocketAddr;
use tracing::trace;

//= https://www.rfc-editor.org/rfc/rfc9000#section-14.1
//# A client MUST expand the payload of all UDP datagrams carrying
//# Initial packets to at least the smallest allowed maximum datagram
//# size of 1200 bytes
const MIN_INITIAL_DATAGRAM: usize = 1200;

/// Rough per-frame overhead reserved when fitting stream data: tag,
/// stream id, offset and length varints at their widest
const STREAM_FRAME_OVERHEAD: usize = 16;

/// The outcome of building one packet
struct BuiltPacket {
    len: usize,
    ack_eliciting: bool,
}

/// Mutable references to everything the application level draws frames
/// from
struct AppSources<'a> {
    streams: &'a mut StreamManager,
    conn_tx: &'a mut TxWindow,
    conn_rx: &'a mut RxWindow,
    local_cids: &'a mut LocalIdRegistry,
    peer_cids: &'a mut PeerIdRegistry,
    pending: &'a mut PendingControl,
    datagrams: &'a mut VecDeque<Vec<u8>>,
    is_server: bool,
    /// An outstanding challenge to carry on the primary path
    challenge: Option<[u8; 8]>,
}

impl Connection {
    /// Fills `buf` with the next outgoing datagram.
    ///
    /// Returns the datagram length and destination, or `None` when there
    /// is nothing to send right now.
    pub fn transmit(
        &mut self,
        buf: &mut [u8],
        now: Timestamp,
    ) -> Option<(usize, SocketAddr)> {
        match &self.state {
            State::Drained | State::Draining { .. } => return None,
            State::Closing { error, .. } => {
                if !self.close_response_pending {
                    return None;
                }
                self.close_response_pending = false;
                let error = *error;
                return self.transmit_close(&error, buf, now);
            }
            _ => {}
        }

        // probe datagrams for paths under validation are sent standalone
        if let Some(result) = self.transmit_path_probe(buf, now) {
            return Some(result);
        }

        let remote_address = self.paths.primary().remote_address;
        let datagram_budget = buf
            .len()
            .min(self.limits.max_udp_payload_size as usize)
            .min(usize::try_from(self.paths.primary().amplification_credit(
                self.endpoint_type.is_server(),
            ))
            .unwrap_or(usize::MAX));

        if datagram_budget < 64 {
            // not enough credit for a useful packet
            return None;
        }

        let probe_pending = self.pto_probes.iter().any(|&count| count > 0);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7
        //# An endpoint MUST NOT send a packet if it would cause bytes_in_
        //# flight [...] to be larger than the congestion window
        let congestion_open = !self.congestion_controller.is_congestion_limited()
            && !self.pacer.is_blocked(now);
        let allow_eliciting = congestion_open || probe_pending;

        let mut offset = 0usize;
        let mut sent_handshake = false;

        // ascending encryption levels, 1-RTT last
        for level in [
            EncryptionLevel::Initial,
            EncryptionLevel::Handshake,
            EncryptionLevel::OneRtt,
        ] {
            if offset >= datagram_budget {
                break;
            }
            let region_budget = datagram_budget - offset;

            let built = match self.build_packet_at_level(
                level,
                &mut buf[offset..],
                region_budget,
                offset,
                allow_eliciting,
                now,
            ) {
                Ok(built) => built,
                Err(error) => {
                    self.close_with_transport_error(error, now);
                    return None;
                }
            };

            if let Some(built) = built {
                if built.ack_eliciting {
                    let slow_start = self.congestion_controller.is_slow_start();
                    let window = self.congestion_controller.congestion_window();
                    self.pacer.on_packet_sent(
                        now,
                        built.len,
                        &self.rtt,
                        window,
                        1200,
                        slow_start,
                    );
                }
                sent_handshake |= level == EncryptionLevel::Handshake;
                offset += built.len;
            }
        }

        if offset == 0 {
            return None;
        }

        //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9.1
        //# a client MUST discard Initial keys when it first sends a
        //# Handshake packet
        if sent_handshake && self.endpoint_type.is_client() {
            self.discard_initial_space();
        }

        self.paths.primary_mut().bytes_sent += offset as u64;
        trace!(len = offset, "transmitting datagram");
        Some((offset, remote_address))
    }

    /// Builds a single packet for `level` into `region`, returning `None`
    /// when the level has nothing to send
    fn build_packet_at_level(
        &mut self,
        level: EncryptionLevel,
        region: &mut [u8],
        region_budget: usize,
        datagram_offset: usize,
        allow_eliciting: bool,
        now: Timestamp,
    ) -> Result<Option<BuiltPacket>, transport::Error> {
        let space_kind = level.space();
        let probe_index = space_kind.as_index();

        // destination and source ids are snapshotted before mutable
        // borrows of the subsystems begin
        let dcid = *self.peer_cids.active_id();
        let scid = *self.local_cids.active_id();
        let token = core::mem::take(&mut self.token);

        let endpoint_type = self.endpoint_type;

        let result = (|| {
            let space = match space_kind {
                PacketNumberSpace::Initial => self.spaces.initial.as_mut(),
                PacketNumberSpace::Handshake => self.spaces.handshake.as_mut(),
                PacketNumberSpace::ApplicationData => Some(&mut self.spaces.application),
            };
            let Some(space) = space else {
                return Ok(None);
            };
            if !space.has_keys() {
                return Ok(None);
            }

            let crypto = self.handshake.stream_mut(level);
            let probe = &mut self.pto_probes[probe_index];

            let ack_due = space.has_ack_interest();
            let crypto_due = crypto.is_transmission_pending();

            let app = if level == EncryptionLevel::OneRtt {
                Some(AppSources {
                    streams: &mut self.streams,
                    conn_tx: &mut self.conn_tx,
                    conn_rx: &mut self.conn_rx,
                    local_cids: &mut self.local_cids,
                    peer_cids: &mut self.peer_cids,
                    pending: &mut self.pending,
                    datagrams: &mut self.datagram_tx,
                    is_server: endpoint_type.is_server(),
                    challenge: self.paths.primary_mut().take_pending_challenge(),
                })
            } else {
                None
            };

            let app_due = app.as_ref().map_or(false, |app| {
                app.streams.is_transmission_pending()
                    || app.pending.handshake_done
                    || app.pending.ping
                    || !app.pending.path_responses.is_empty()
                    || !app.pending.new_tokens.is_empty()
                    || !app.datagrams.is_empty()
                    || app.challenge.is_some()
            });

            let probe_due = *probe > 0;
            if !(ack_due || crypto_due || app_due || probe_due) {
                return Ok(None);
            }

            // a packet that only carries an ACK does not count against the
            // congestion window; everything else does
            if !allow_eliciting && (crypto_due || app_due || probe_due) && !ack_due {
                return Ok(None);
            }

            let pad_datagram_to = if level == EncryptionLevel::Initial
                && (endpoint_type.is_client() || crypto_due || probe_due)
            {
                Some(MIN_INITIAL_DATAGRAM.saturating_sub(datagram_offset))
            } else {
                None
            };

            build_packet(
                level,
                endpoint_type,
                &dcid,
                &scid,
                &token,
                space,
                crypto,
                probe,
                allow_eliciting,
                app,
                region,
                region_budget,
                pad_datagram_to,
                &mut self.congestion_controller,
                now,
            )
        })();

        // the token is carried on every client Initial until the handshake
        // progresses
        self.token = token;

        result
    }

    /// Sends a probe datagram on a path that is being validated
    fn transmit_path_probe(
        &mut self,
        buf: &mut [u8],
        now: Timestamp,
    ) -> Option<(usize, SocketAddr)> {
        if self.spaces.application.one_rtt_keys().is_none() {
            return None;
        }

        let primary_address = self.paths.primary().remote_address;
        let mut target: Option<(SocketAddr, [u8; 8])> = None;
        for path in self.paths.iter_mut() {
            if path.remote_address == primary_address {
                continue;
            }
            if let Some(data) = path.take_pending_challenge() {
                target = Some((path.remote_address, data));
                break;
            }
        }
        let (address, data) = target?;

        let dcid = *self.peer_cids.active_id();
        let len = self.build_probe_packet(&dcid, data, buf, now)?;
        Some((len, address))
    }

    fn build_probe_packet(
        &mut self,
        dcid: &quell_quic_core::connection::ConnectionId,
        challenge: [u8; 8],
        buf: &mut [u8],
        now: Timestamp,
    ) -> Option<usize> {
        let space = &mut self.spaces.application;
        let key_phase = space.one_rtt_keys()?.key_phase();

        let packet_number = space.next_packet_number().ok()?;
        let largest_acked = space
            .recovery
            .largest_acked()
            .unwrap_or_else(|| space.space().new_packet_number(VarInt::ZERO));
        let truncated = packet_number.truncate(largest_acked)?;

        let mut encoder = EncoderBuffer::new(buf);
        packet::short::encode_header(&mut encoder, dcid, key_phase, truncated);
        let pn_offset = encoder.len() - truncated.len().bytesize();

        encoder.encode(&PathChallenge { data: challenge });
        //= https://www.rfc-editor.org/rfc/rfc9000#section-8.2.1
        //# An endpoint MUST expand datagrams that contain a PATH_CHALLENGE
        //# frame to at least the smallest allowed maximum datagram size of
        //# 1200 bytes
        let tag_len = 16;
        let target = MIN_INITIAL_DATAGRAM.min(encoder.capacity()) - tag_len;
        if encoder.len() < target {
            let padding = target - encoder.len();
            encoder.encode(&frame::Padding { length: padding });
        }
        let payload_end = encoder.len();

        let keys = space.one_rtt_keys_mut()?;
        let total = seal_short_packet(
            keys.sealer(),
            buf,
            pn_offset,
            truncated.len().bytesize(),
            payload_end,
            packet_number.as_u64(),
        )
        .ok()?;
        keys.on_packet_sealed(packet_number.as_u64()).ok()?;

        let info = SentPacketInfo {
            sent_bytes: total as u16,
            time_sent: now,
            ack_elicitation: AckElicitation::Eliciting,
            in_flight: true,
            ecn: ExplicitCongestionNotification::NotEct,
            retransmit: smallvec![],
        };
        space
            .recovery
            .on_packet_sent(packet_number, info, &mut self.congestion_controller);

        Some(total)
    }

    /// Builds a datagram carrying only a CONNECTION_CLOSE frame
    //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2.1
    //# An endpoint in the closing state sends a packet containing a
    //# CONNECTION_CLOSE frame whenever packets are received from the peer.
    fn transmit_close(
        &mut self,
        error: &transport::Error,
        buf: &mut [u8],
        now: Timestamp,
    ) -> Option<(usize, SocketAddr)> {
        let remote_address = self.paths.primary().remote_address;
        let close = ConnectionClose::from(*error);

        // prefer 1-RTT; fall back to the handshake then initial levels
        let (level, space) = if self.spaces.application.one_rtt_keys().is_some() {
            (EncryptionLevel::OneRtt, &mut self.spaces.application)
        } else if let Some(space) = self.spaces.handshake.as_mut() {
            if space.has_keys() {
                (EncryptionLevel::Handshake, space)
            } else {
                (EncryptionLevel::Initial, self.spaces.initial.as_mut()?)
            }
        } else {
            (EncryptionLevel::Initial, self.spaces.initial.as_mut()?)
        };

        let dcid = *self.peer_cids.active_id();
        let scid = *self.local_cids.active_id();

        let packet_number = space.next_packet_number().ok()?;
        let largest_acked = space
            .recovery
            .largest_acked()
            .unwrap_or_else(|| space.space().new_packet_number(VarInt::ZERO));
        let truncated = packet_number.truncate(largest_acked)?;

        let mut encoder = EncoderBuffer::new(buf);
        let (pn_offset, length_offset) = match level {
            EncryptionLevel::OneRtt => {
                let key_phase = space
                    .one_rtt_keys()
                    .map(|keys| keys.key_phase())
                    .unwrap_or_default();
                packet::short::encode_header(&mut encoder, &dcid, key_phase, truncated);
                (encoder.len() - truncated.len().bytesize(), None)
            }
            EncryptionLevel::Handshake => {
                packet::handshake::encode_header(
                    &mut encoder,
                    QUIC_VERSION,
                    &dcid,
                    &scid,
                    truncated,
                );
                let length_offset = encoder.len();
                encoder.encode(&0x4000u16); // placeholder length
                let pn_offset = encoder.len();
                truncated.encode(&mut encoder);
                (pn_offset, Some(length_offset))
            }
            _ => {
                packet::initial::encode_header(
                    &mut encoder,
                    QUIC_VERSION,
                    &dcid,
                    &scid,
                    &[],
                    truncated,
                );
                let length_offset = encoder.len();
                encoder.encode(&0x4000u16);
                let pn_offset = encoder.len();
                truncated.encode(&mut encoder);
                (pn_offset, Some(length_offset))
            }
        };

        let payload_start = encoder.len();
        encoder.encode(&close);
        // leave room for the header protection sample
        if encoder.len() - payload_start < 4 {
            let padding = 4 - (encoder.len() - payload_start);
            encoder.encode(&frame::Padding { length: padding });
        }
        let payload_end = encoder.len();

        let keys = space.sealer()?;
        let tag_len = keys.packet.tag_len();

        if let Some(length_offset) = length_offset {
            let pn_len = truncated.len().bytesize();
            let length = pn_len + (payload_end - payload_start) + tag_len;
            patch_length(buf, length_offset, length);
        }

        let keys = space.sealer()?;
        let total = seal_short_packet(
            keys,
            buf,
            pn_offset,
            truncated.len().bytesize(),
            payload_end,
            packet_number.as_u64(),
        )
        .ok()?;

        let _ = now;
        Some((total, remote_address))
    }
}

/// Patches a 2-byte varint length field in place
fn patch_length(buf: &mut [u8], offset: usize, length: usize) {
    debug_assert!(length < (1 << 14));
    buf[offset] = 0x40 | ((length >> 8) as u8);
    buf[offset + 1] = length as u8;
}

/// Encrypts the payload and applies header protection.
///
/// Despite the name this works for long headers as well: `pn_offset` and
/// `payload_end` fully describe the packet layout.
fn seal_short_packet(
    keys: &quell_quic_crypto::DirectionalKeys,
    buf: &mut [u8],
    pn_offset: usize,
    pn_len: usize,
    payload_end: usize,
    packet_number: u64,
) -> Result<usize, transport::Error> {
    let tag_len = keys.packet.tag_len();
    let total = payload_end + tag_len;

    let (header, payload) = buf[..total].split_at_mut(pn_offset + pn_len);
    keys.packet
        .encrypt(packet_number, header, payload)
        .map_err(transport::Error::from)?;

    apply_header_protection(&keys.header, &mut buf[..total], pn_offset, pn_len)
        .map_err(transport::Error::from)?;

    Ok(total)
}

/// Assembles and seals one packet at `level`
#[allow(clippy::too_many_arguments)]
fn build_packet(
    level: EncryptionLevel,
    endpoint_type: endpoint::Type,
    dcid: &quell_quic_core::connection::ConnectionId,
    scid: &quell_quic_core::connection::ConnectionId,
    token: &[u8],
    space: &mut PacketSpace,
    crypto: &mut CryptoStream,
    probe: &mut u8,
    allow_eliciting: bool,
    app: Option<AppSources>,
    region: &mut [u8],
    region_budget: usize,
    pad_datagram_to: Option<usize>,
    congestion_controller: &mut quell_quic_core::recovery::NewReno,
    now: Timestamp,
) -> Result<Option<BuiltPacket>, transport::Error> {
    let Some(sealer) = space.sealer() else {
        return Ok(None);
    };
    let tag_len = sealer.packet.tag_len();

    let packet_number = space.next_packet_number()?;
    let largest_acked = space
        .recovery
        .largest_acked()
        .unwrap_or_else(|| space.space().new_packet_number(VarInt::ZERO));
    let Some(truncated) = packet_number.truncate(largest_acked) else {
        return Ok(None);
    };
    let pn_len = truncated.len().bytesize();

    let budget = region_budget.min(region.len());
    let mut encoder = EncoderBuffer::new(&mut region[..budget]);

    // ===== header =====
    let (pn_offset, length_offset) = match level {
        EncryptionLevel::Initial => {
            packet::initial::encode_header(
                &mut encoder,
                QUIC_VERSION,
                dcid,
                scid,
                if endpoint_type.is_client() { token } else { &[] },
                truncated,
            );
            let length_offset = encoder.len();
            encoder.encode(&0x4000u16); // placeholder, patched below
            let pn_offset = encoder.len();
            truncated.encode(&mut encoder);
            (pn_offset, Some(length_offset))
        }
        EncryptionLevel::Handshake => {
            packet::handshake::encode_header(&mut encoder, QUIC_VERSION, dcid, scid, truncated);
            let length_offset = encoder.len();
            encoder.encode(&0x4000u16);
            let pn_offset = encoder.len();
            truncated.encode(&mut encoder);
            (pn_offset, Some(length_offset))
        }
        EncryptionLevel::OneRtt => {
            let key_phase = space
                .one_rtt_keys()
                .map(|keys| keys.key_phase())
                .unwrap_or_default();
            packet::short::encode_header(&mut encoder, dcid, key_phase, truncated);
            (encoder.len() - pn_len, None)
        }
        EncryptionLevel::ZeroRtt => return Ok(None),
    };

    let payload_start = encoder.len();
    let payload_limit = budget.saturating_sub(tag_len);
    let mut retransmit: FrameList = smallvec![];
    let mut elicitation = AckElicitation::NonEliciting;

    // ===== ACK =====
    if space.has_ack_interest() {
        // snapshot ecn reporting before the mutable borrow
        if let Some((ranges, delay, ecn_counts)) = space.ack_contents(now, true) {
            let micros = delay.as_micros() as u64;
            let ack = frame::Ack {
                ack_delay: VarInt::new(micros >> super::ACK_DELAY_EXPONENT)
                    .unwrap_or(VarInt::MAX),
                ack_ranges: ranges,
                ecn_counts,
            };
            if payload_limit.saturating_sub(encoder.len()) > ack.encoding_size() {
                encoder.encode(&ack);
            }
        }
    }

    // ===== CRYPTO =====
    if allow_eliciting || *probe > 0 {
        while encoder.len() + 16 < payload_limit {
            let room = (payload_limit - encoder.len()).saturating_sub(12) as u64;
            let Some((offset, data)) = crypto.transmit_chunk(room) else {
                break;
            };
            let len = data.len() as u64;
            let frame = Crypto {
                offset: VarInt::new(offset).unwrap_or(VarInt::MAX),
                data: &data[..],
            };
            encoder.encode(&frame);
            retransmit.push(Retransmit::Crypto { level, offset, len });
            elicitation = elicitation.merge(AckElicitation::Eliciting);
        }
    }

    // ===== application frames =====
    if let Some(mut app) = app {
        if allow_eliciting || *probe > 0 {
            write_app_frames(
                &mut encoder,
                payload_limit,
                &mut app,
                &mut retransmit,
                &mut elicitation,
            );
        }
    }

    // ===== probes =====
    if *probe > 0 && !elicitation.is_ack_eliciting() {
        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.4
        //# When there is no data to send, the sender SHOULD send a PING or
        //# other ack-eliciting frame in a single packet, re-arming the PTO
        //# timer.
        if encoder.len() + 1 <= payload_limit {
            encoder.encode(&Ping);
            retransmit.push(Retransmit::Ping);
            elicitation = elicitation.merge(AckElicitation::Eliciting);
        }
    }
    if *probe > 0 && elicitation.is_ack_eliciting() {
        *probe -= 1;
    }

    if encoder.len() == payload_start {
        // nothing made it into the packet; roll back the number
        return Ok(None);
    }

    // ===== padding =====
    let mut payload_end = encoder.len();
    let mut padded = false;
    // the header protection sample requires pn_len + payload >= 4 bytes
    let min_payload = 4usize.saturating_sub(pn_len);
    if payload_end - payload_start < min_payload {
        let padding = min_payload - (payload_end - payload_start);
        encoder.encode(&frame::Padding { length: padding });
        payload_end = encoder.len();
        padded = true;
    }
    if let Some(target) = pad_datagram_to {
        let target_payload_end = target.saturating_sub(tag_len).min(payload_limit);
        if payload_end < target_payload_end {
            encoder.encode(&frame::Padding {
                length: target_payload_end - payload_end,
            });
            payload_end = encoder.len();
            padded = true;
        }
    }

    // ===== length patch + seal =====
    if let Some(length_offset) = length_offset {
        let length = pn_len + (payload_end - payload_start) + tag_len;
        patch_length(region, length_offset, length);
    }

    let sealer = space.sealer().expect("keys were present above");
    let total = seal_short_packet(
        sealer,
        region,
        pn_offset,
        pn_len,
        payload_end,
        packet_number.as_u64(),
    )?;

    if level == EncryptionLevel::OneRtt {
        if let Some(keys) = space.one_rtt_keys_mut() {
            keys.on_packet_sealed(packet_number.as_u64())?;

            //= https://www.rfc-editor.org/rfc/rfc9001#section-6.1
            //# An endpoint SHOULD NOT wait to initiate a key update until its
            //# packet protection keys are nearing their limits.
            if keys.update_advisable() && keys.initiate_key_update() {
                tracing::debug!("initiated key update");
            }
        }
    }

    let ack_eliciting = elicitation.is_ack_eliciting();
    let info = SentPacketInfo {
        sent_bytes: total as u16,
        time_sent: now,
        ack_elicitation: elicitation,
        //= https://www.rfc-editor.org/rfc/rfc9002#section-2
        //# Packets are considered in flight when they are ack-eliciting or
        //# contain a PADDING frame
        in_flight: ack_eliciting || padded,
        ecn: ExplicitCongestionNotification::NotEct,
        retransmit,
    };
    space
        .recovery
        .on_packet_sent(packet_number, info, congestion_controller);

    Ok(Some(BuiltPacket {
        len: total,
        ack_eliciting,
    }))
}

/// Writes control and stream frames for the application level
fn write_app_frames(
    encoder: &mut EncoderBuffer,
    payload_limit: usize,
    app: &mut AppSources,
    retransmit: &mut FrameList,
    elicitation: &mut AckElicitation,
) {
    let mut eliciting = |retransmit_entry: Option<Retransmit>,
                         retransmit: &mut FrameList,
                         elicitation: &mut AckElicitation| {
        if let Some(entry) = retransmit_entry {
            retransmit.push(entry);
        }
        *elicitation = elicitation.merge(AckElicitation::Eliciting);
    };

    macro_rules! room {
        ($frame:expr) => {{
            let frame = $frame;
            if encoder.len() + frame.encoding_size() <= payload_limit {
                encoder.encode(&frame);
                true
            } else {
                false
            }
        }};
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-19.20
    //# The server MUST send a HANDSHAKE_DONE frame as soon as the
    //# handshake is complete.
    if app.pending.handshake_done && app.is_server {
        if room!(HandshakeDone) {
            app.pending.handshake_done = false;
            eliciting(Some(Retransmit::HandshakeDone), retransmit, elicitation);
        }
    }

    while let Some(data) = app.pending.path_responses.pop_front() {
        if room!(PathResponse { data }) {
            eliciting(None, retransmit, elicitation);
        } else {
            app.pending.path_responses.push_front(data);
            break;
        }
    }

    if let Some(data) = app.challenge.take() {
        if room!(PathChallenge { data }) {
            eliciting(None, retransmit, elicitation);
        }
    }

    if app.pending.ping {
        if room!(Ping) {
            app.pending.ping = false;
            eliciting(Some(Retransmit::Ping), retransmit, elicitation);
        }
    }

    for frame in app.local_cids.pending_transmissions() {
        let sequence_number = frame.sequence_number;
        if room!(frame) {
            eliciting(
                Some(Retransmit::NewConnectionId { sequence_number }),
                retransmit,
                elicitation,
            );
        } else {
            app.local_cids.on_new_connection_id_lost(sequence_number);
            break;
        }
    }

    for sequence_number in app.peer_cids.pending_retirements() {
        if room!(frame::RetireConnectionId { sequence_number }) {
            eliciting(
                Some(Retransmit::RetireConnectionId { sequence_number }),
                retransmit,
                elicitation,
            );
        } else {
            app.peer_cids.on_retire_connection_id_lost(sequence_number);
            break;
        }
    }

    // connection-level window update
    if let Some(limit) = app.conn_rx.window_update() {
        if room!(MaxData {
            maximum_data: limit
        }) {
            eliciting(Some(Retransmit::MaxData), retransmit, elicitation);
        } else {
            app.conn_rx.request_update();
        }
    }

    for (id, limit) in app.streams.pending_window_updates() {
        if room!(MaxStreamData {
            stream_id: id.as_varint(),
            maximum_stream_data: limit,
        }) {
            eliciting(Some(Retransmit::MaxStreamData { id }), retransmit, elicitation);
        } else {
            app.streams.on_max_stream_data_lost(id);
        }
    }

    for (stream_type, limit) in app.streams.pending_max_streams() {
        if room!(MaxStreams {
            stream_type,
            maximum_streams: limit,
        }) {
            eliciting(
                Some(Retransmit::MaxStreams { stream_type }),
                retransmit,
                elicitation,
            );
        } else {
            app.streams.on_max_streams_lost(stream_type);
        }
    }

    for (id, error, final_size) in app.streams.pending_resets() {
        if room!(ResetStream {
            stream_id: id.as_varint(),
            application_error_code: error.as_varint(),
            final_size,
        }) {
            eliciting(Some(Retransmit::ResetStream { id }), retransmit, elicitation);
        }
    }

    for (id, error) in app.streams.pending_stop_sendings() {
        if room!(StopSending {
            stream_id: id.as_varint(),
            application_error_code: error.as_varint(),
        }) {
            eliciting(Some(Retransmit::StopSending { id }), retransmit, elicitation);
        }
    }

    while let Some(token) = app.pending.new_tokens.pop_front() {
        let frame = NewToken { token: &token };
        if encoder.len() + frame.encoding_size() <= payload_limit {
            encoder.encode(&frame);
            eliciting(Some(Retransmit::NewToken), retransmit, elicitation);
        } else {
            app.pending.new_tokens.push_front(token);
            break;
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9221#section-5
    //# DATAGRAM frames [...] are not retransmitted upon loss detection
    while let Some(data) = app.datagrams.pop_front() {
        let frame = Datagram {
            is_last_frame: false,
            data: &data[..],
        };
        if encoder.len() + frame.encoding_size() <= payload_limit {
            encoder.encode(&frame);
            eliciting(None, retransmit, elicitation);
        } else {
            app.datagrams.push_front(data);
            break;
        }
    }

    // blocked signals, at most once per limit value
    if let Some(limit) = app.conn_tx.blocked_frame_value() {
        room!(frame::DataBlocked { data_limit: limit });
    }

    // ===== stream data fills the remainder =====
    while encoder.len() + STREAM_FRAME_OVERHEAD < payload_limit {
        let room = (payload_limit - encoder.len() - STREAM_FRAME_OVERHEAD) as u64;
        let credit = app.conn_tx.available();
        let Some((chunk, credits)) = app.streams.next_chunk(room, credit) else {
            break;
        };
        app.conn_tx.consume(credits as usize);

        let len = chunk.data.len() as u64;
        let frame = StreamFrame {
            stream_id: chunk.stream_id.as_varint(),
            offset: VarInt::new(chunk.offset).unwrap_or(VarInt::MAX),
            is_last_frame: false,
            is_fin: chunk.is_fin,
            data: &chunk.data[..],
        };
        encoder.encode(&frame);
        eliciting(
            Some(Retransmit::Stream {
                id: chunk.stream_id,
                offset: chunk.offset,
                len,
                is_fin: chunk.is_fin,
            }),
            retransmit,
            elicitation,
        );
    }
}
