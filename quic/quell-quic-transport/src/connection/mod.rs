// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The connection: one 4-tuple + connection id pair
//!
//! A `Connection` is a sans-IO state machine. The embedding runtime feeds
//! it datagrams (`on_datagram`), drains outgoing datagrams (`transmit`),
//! and drives `on_timeout` at the deadline reported by `next_timeout`.
//! All state is mutated from a single logical task.

mod transmit;

use crate::{
    cid::{LocalIdRegistry, PeerIdRegistry},
    flow::{RxWindow, TxWindow},
    handshake::Handshake,
    path,
    recovery::Retransmit,
    space::PacketSpace,
    stream::{RecvError, SendError, StreamManager},
    tls,
};
use alloc::{boxed::Box, collections::VecDeque, vec::Vec};
use quell_quic_core::{
    application,
    connection::ConnectionId,
    crypto::EncryptionLevel,
    endpoint,
    frame::{self, ack_elicitation::{AckElicitable, AckElicitation}, Frame, FrameIter},
    inet::ExplicitCongestionNotification,
    packet::{number::PacketNumberSpace, ProtectedPacket},
    random,
    recovery::{NewReno, Pacer, RttEstimator},
    stream::{StreamId, StreamType},
    time::{Duration, Timestamp},
    transport, transport_error,
    transport::parameters::TransportParameters,
    varint::VarInt,
    QUIC_VERSION,
};
use quell_quic_crypto::KeyPair;
use std::net::SocketAddr;
use tracing::{debug, trace, warn};

/// Local configuration knobs, mapped into transport parameters
#[derive(Clone, Debug)]
pub struct Limits {
    pub initial_max_data: VarInt,
    pub initial_max_stream_data_bidi_local: VarInt,
    pub initial_max_stream_data_bidi_remote: VarInt,
    pub initial_max_stream_data_uni: VarInt,
    pub initial_max_streams_bidi: VarInt,
    pub initial_max_streams_uni: VarInt,
    pub max_idle_timeout: Duration,
    pub max_udp_payload_size: u16,
    pub max_ack_delay: Duration,
    pub active_connection_id_limit: VarInt,
    pub max_datagram_frame_size: VarInt,
    pub keep_alive_interval: Option<Duration>,
    pub disable_active_migration: bool,
    pub enable_ecn: bool,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            initial_max_data: VarInt::from_u32(10 * 1024 * 1024),
            initial_max_stream_data_bidi_local: VarInt::from_u32(1024 * 1024),
            initial_max_stream_data_bidi_remote: VarInt::from_u32(1024 * 1024),
            initial_max_stream_data_uni: VarInt::from_u32(1024 * 1024),
            initial_max_streams_bidi: VarInt::from_u8(100),
            initial_max_streams_uni: VarInt::from_u8(100),
            max_idle_timeout: Duration::from_secs(30),
            max_udp_payload_size: 1452,
            max_ack_delay: Duration::from_millis(25),
            active_connection_id_limit: VarInt::from_u8(4),
            max_datagram_frame_size: VarInt::ZERO,
            keep_alive_interval: None,
            disable_active_migration: false,
            enable_ecn: false,
        }
    }
}

impl Limits {
    fn transport_parameters(
        &self,
        local_cid: &ConnectionId,
        original_destination_connection_id: Option<&ConnectionId>,
        retry_source_connection_id: Option<&ConnectionId>,
    ) -> TransportParameters {
        TransportParameters {
            original_destination_connection_id: original_destination_connection_id.copied(),
            max_idle_timeout: VarInt::new(self.max_idle_timeout.as_millis() as u64)
                .unwrap_or(VarInt::MAX),
            stateless_reset_token: None,
            max_udp_payload_size: VarInt::from_u16(self.max_udp_payload_size.max(1200)),
            initial_max_data: self.initial_max_data,
            initial_max_stream_data_bidi_local: self.initial_max_stream_data_bidi_local,
            initial_max_stream_data_bidi_remote: self.initial_max_stream_data_bidi_remote,
            initial_max_stream_data_uni: self.initial_max_stream_data_uni,
            initial_max_streams_bidi: self.initial_max_streams_bidi,
            initial_max_streams_uni: self.initial_max_streams_uni,
            ack_delay_exponent: ACK_DELAY_EXPONENT,
            max_ack_delay: VarInt::new(self.max_ack_delay.as_millis() as u64)
                .unwrap_or(VarInt::from_u8(25)),
            disable_active_migration: self.disable_active_migration,
            preferred_address: None,
            active_connection_id_limit: self.active_connection_id_limit,
            initial_source_connection_id: Some(*local_cid),
            retry_source_connection_id: retry_source_connection_id.copied(),
            max_datagram_frame_size: self.max_datagram_frame_size,
        }
    }
}

/// We encode ack delays with the default exponent
const ACK_DELAY_EXPONENT: u8 = 3;

/// How long a path challenge waits before being retried
const PATH_CHALLENGE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection construction inputs
pub struct Config {
    pub endpoint_type: endpoint::Type,
    pub limits: Limits,
    /// The connection id we advertise (our source id during the handshake)
    pub local_connection_id: ConnectionId,
    /// The peer's id: the randomly chosen destination id on a client, the
    /// client's source id on a server
    pub peer_connection_id: ConnectionId,
    /// The destination id of the client's first Initial, which keys the
    /// Initial secrets
    pub initial_destination_connection_id: ConnectionId,
    pub remote_address: SocketAddr,
    /// Token to carry in Initial packets (from NEW_TOKEN or Retry)
    pub token: Vec<u8>,
}

/// Why the connection terminated
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionError {
    /// The peer closed with a transport error
    Transport { code: VarInt, reason: Vec<u8> },
    /// The peer closed with an application error
    Application { code: VarInt, reason: Vec<u8> },
    /// The connection was closed locally
    LocallyClosed { code: VarInt },
    /// The idle timer expired
    IdleTimeout,
    /// The server offered different versions
    VersionNegotiation(Vec<u32>),
}

impl core::fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Transport { code, reason } => write!(
                f,
                "connection closed by peer: code {code}, reason {:?}",
                core::str::from_utf8(reason).unwrap_or("<binary>")
            ),
            Self::Application { code, reason } => write!(
                f,
                "connection closed by application: code {code}, reason {:?}",
                core::str::from_utf8(reason).unwrap_or("<binary>")
            ),
            Self::LocallyClosed { code } => write!(f, "connection closed locally: code {code}"),
            Self::IdleTimeout => write!(f, "connection idle timeout"),
            Self::VersionNegotiation(_) => write!(f, "the server does not support version 1"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConnectionError {}

//= https://www.rfc-editor.org/rfc/rfc9000#section-10.2
//# An endpoint enters the closing state after initiating an immediate
//# close.  [...] The draining state is entered once an endpoint receives
//# a CONNECTION_CLOSE frame
#[derive(Debug)]
enum State {
    Handshaking,
    Active,
    /// We initiated the close and replay CONNECTION_CLOSE until the drain
    /// interval elapses
    Closing { error: transport::Error, until: Timestamp },
    /// The peer initiated the close; we send nothing further
    Draining { until: Timestamp },
    Drained,
}

/// Packet spaces, discarded at their protocol milestones
struct Spaces {
    initial: Option<PacketSpace>,
    handshake: Option<PacketSpace>,
    application: PacketSpace,
}

impl Spaces {
    fn get_mut(&mut self, space: PacketNumberSpace) -> Option<&mut PacketSpace> {
        match space {
            PacketNumberSpace::Initial => self.initial.as_mut(),
            PacketNumberSpace::Handshake => self.handshake.as_mut(),
            PacketNumberSpace::ApplicationData => Some(&mut self.application),
        }
    }
}

/// Control frames queued outside of any one subsystem
#[derive(Default)]
struct PendingControl {
    handshake_done: bool,
    ping: bool,
    path_responses: VecDeque<[u8; 8]>,
    /// Tokens queued by the server for NEW_TOKEN frames
    new_tokens: VecDeque<Vec<u8>>,
    /// Tokens received from the server, exposed to the application for
    /// future connections
    received_tokens: VecDeque<Vec<u8>>,
}

/// Secrets and progress collected from a TLS session callback, applied to
/// the connection after the call returns
#[derive(Default)]
struct TlsCollector {
    local_parameters: Vec<u8>,
    emitted: Vec<(EncryptionLevel, Vec<u8>)>,
    secrets: Vec<(EncryptionLevel, tls::Secrets)>,
    peer_parameters: Option<Vec<u8>>,
    complete: bool,
    application_protocol: Option<Vec<u8>>,
}

impl tls::Context for TlsCollector {
    fn send_handshake_data(&mut self, level: EncryptionLevel, data: &[u8]) {
        self.emitted.push((level, data.to_vec()));
    }

    fn install_secrets(&mut self, level: EncryptionLevel, secrets: tls::Secrets) {
        self.secrets.push((level, secrets));
    }

    fn local_transport_parameters(&mut self) -> Vec<u8> {
        self.local_parameters.clone()
    }

    fn on_peer_transport_parameters(&mut self, encoded: &[u8]) {
        self.peer_parameters = Some(encoded.to_vec());
    }

    fn on_handshake_complete(&mut self) {
        self.complete = true;
    }

    fn on_application_protocol(&mut self, protocol: &[u8]) {
        self.application_protocol = Some(protocol.to_vec());
    }
}

pub struct Connection {
    endpoint_type: endpoint::Type,
    state: State,
    limits: Limits,
    local_parameters: TransportParameters,
    peer_parameters: Option<TransportParameters>,
    spaces: Spaces,
    handshake: Handshake,
    tls: Option<Box<dyn tls::Session>>,
    streams: StreamManager,
    /// Connection-level send credit granted by the peer
    conn_tx: TxWindow,
    /// Connection-level receive window we grant
    conn_rx: RxWindow,
    /// Cumulative highest-offset bytes received across streams
    conn_bytes_received: u64,
    rtt: RttEstimator,
    congestion_controller: NewReno,
    pacer: Pacer,
    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2
    //# A sender computes its PTO timer every time an ack-eliciting packet
    //# is sent.  [...] the PTO backoff factor is doubled on every PTO
    //# expiration
    pto_backoff: u32,
    paths: path::Manager,
    local_cids: LocalIdRegistry,
    peer_cids: PeerIdRegistry,
    /// The client's first destination id, keying Initial secrets and
    /// checked against the server's transport parameters
    original_destination_connection_id: ConnectionId,
    /// The source id from a Retry packet, checked against the server's
    /// transport parameters
    retry_source_connection_id: Option<ConnectionId>,
    /// Token carried in outgoing Initial packets
    token: Vec<u8>,
    pending: PendingControl,
    /// Number of probe packets owed after a PTO fired, per space
    pto_probes: [u8; PacketNumberSpace::COUNT],
    datagram_tx: VecDeque<Vec<u8>>,
    datagram_rx: VecDeque<Vec<u8>>,
    random: Box<dyn random::Generator>,
    last_activity: Timestamp,
    /// Set when a received packet requires a CONNECTION_CLOSE replay while
    /// closing
    close_response_pending: bool,
    error: Option<ConnectionError>,
    application_protocol: Option<Vec<u8>>,
}

impl Connection {
    pub fn new(
        config: Config,
        tls: Box<dyn tls::Session>,
        random: Box<dyn random::Generator>,
        now: Timestamp,
    ) -> Result<Self, transport::Error> {
        let endpoint_type = config.endpoint_type;

        let original_destination_connection_id = config.initial_destination_connection_id;
        let local_parameters = config.limits.transport_parameters(
            &config.local_connection_id,
            endpoint_type
                .is_server()
                .then_some(&original_destination_connection_id),
            None,
        );

        let mut spaces = Spaces {
            initial: Some(PacketSpace::new(PacketNumberSpace::Initial)),
            handshake: Some(PacketSpace::new(PacketNumberSpace::Handshake)),
            application: PacketSpace::new(PacketNumberSpace::ApplicationData),
        };

        //= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
        //# Initial packets apply the packet protection process, but use a
        //# secret derived from the Destination Connection ID in the client's
        //# first Initial packet.
        spaces
            .initial
            .as_mut()
            .expect("initial space was just created")
            .install_keys(KeyPair::new_initial(
                endpoint_type,
                original_destination_connection_id.as_slice(),
            ));

        let streams = StreamManager::new(endpoint_type, &local_parameters);
        let conn_rx = RxWindow::new(local_parameters.initial_max_data);

        let mut connection = Self {
            endpoint_type,
            state: State::Handshaking,
            limits: config.limits,
            local_parameters,
            peer_parameters: None,
            spaces,
            handshake: Handshake::default(),
            tls: Some(tls),
            streams,
            conn_tx: TxWindow::new(VarInt::ZERO),
            conn_rx,
            conn_bytes_received: 0,
            rtt: RttEstimator::default(),
            congestion_controller: NewReno::new(1200),
            pacer: Pacer::default(),
            pto_backoff: 1,
            paths: path::Manager::new(config.remote_address, endpoint_type.is_server()),
            local_cids: LocalIdRegistry::new(config.local_connection_id),
            peer_cids: PeerIdRegistry::new(
                config.peer_connection_id,
                VarInt::from_u8(4),
            ),
            original_destination_connection_id,
            retry_source_connection_id: None,
            token: config.token,
            pending: PendingControl::default(),
            pto_probes: [0; PacketNumberSpace::COUNT],
            datagram_tx: VecDeque::new(),
            datagram_rx: VecDeque::new(),
            random,
            last_activity: now,
            close_response_pending: false,
            error: None,
            application_protocol: None,
        };

        if endpoint_type.is_client() {
            connection.drive_tls(|session, context| session.start(context))?;
        }

        Ok(connection)
    }

    // ===== accessors =====

    #[inline]
    pub fn endpoint_type(&self) -> endpoint::Type {
        self.endpoint_type
    }

    #[inline]
    pub fn is_handshake_complete(&self) -> bool {
        self.handshake.is_complete()
    }

    #[inline]
    pub fn is_handshake_confirmed(&self) -> bool {
        self.handshake.is_confirmed()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self.state, State::Drained)
    }

    #[inline]
    pub fn is_draining(&self) -> bool {
        matches!(
            self.state,
            State::Closing { .. } | State::Draining { .. } | State::Drained
        )
    }

    #[inline]
    pub fn error(&self) -> Option<&ConnectionError> {
        self.error.as_ref()
    }

    #[inline]
    pub fn application_protocol(&self) -> Option<&[u8]> {
        self.application_protocol.as_deref()
    }

    #[inline]
    pub fn remote_address(&self) -> SocketAddr {
        self.paths.primary().remote_address
    }

    #[inline]
    pub fn local_connection_id(&self) -> &ConnectionId {
        self.local_cids.active_id()
    }

    /// Every connection id a dispatcher should route to this connection
    pub fn local_connection_ids(&self) -> Vec<ConnectionId> {
        self.local_cids.ids().copied().collect()
    }

    /// Tokens received in NEW_TOKEN frames, for use in future connections
    pub fn take_new_token(&mut self) -> Option<Vec<u8>> {
        self.pending.received_tokens.pop_front()
    }

    /// Queues a token to offer the client for a future connection
    pub fn offer_new_token(&mut self, token: &[u8]) {
        debug_assert!(self.endpoint_type.is_server());
        if !token.is_empty() {
            self.pending.new_tokens.push_back(token.to_vec());
        }
    }

    // ===== application operations =====

    /// Opens a locally initiated stream, or returns `None` when the
    /// peer's stream limit is exhausted (retry after a MAX_STREAMS update)
    pub fn try_open_stream(&mut self, stream_type: StreamType) -> Option<StreamId> {
        if self.error.is_some() {
            return None;
        }
        self.streams.open(stream_type).ok()
    }

    pub fn accept_stream(&mut self) -> Option<StreamId> {
        self.streams.accept()
    }

    pub fn stream_write(&mut self, id: StreamId, data: &[u8]) -> Result<usize, SendError> {
        self.streams.write(id, data)
    }

    pub fn stream_finish(&mut self, id: StreamId) -> Result<(), SendError> {
        self.streams.finish(id)
    }

    pub fn stream_reset(
        &mut self,
        id: StreamId,
        error: application::Error,
    ) -> Result<(), SendError> {
        self.streams.reset(id, error)
    }

    pub fn stream_read(
        &mut self,
        id: StreamId,
        out: &mut [u8],
    ) -> Result<(usize, bool), RecvError> {
        let (len, fin) = self.streams.read(id, out)?;
        if len > 0 {
            self.conn_rx.on_data_consumed(len);
        }
        Ok((len, fin))
    }

    pub fn stream_stop_sending(&mut self, id: StreamId, error: application::Error) {
        self.streams.stop_sending(id, error);
    }

    pub fn is_stream_readable(&self, id: StreamId) -> bool {
        self.streams.is_readable(id)
    }

    pub fn stream_write_capacity(&self, id: StreamId) -> u64 {
        self.streams.write_capacity(id)
    }

    /// Queues an unreliable datagram
    //= https://www.rfc-editor.org/rfc/rfc9221#section-5
    //# DATAGRAM frames cannot be sent in all packet types.
    pub fn send_datagram(&mut self, data: Vec<u8>) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        let max = self
            .peer_parameters
            .as_ref()
            .map_or(VarInt::ZERO, |p| p.max_datagram_frame_size);
        if max == VarInt::ZERO || data.len() as u64 > max.as_u64() {
            return Err(ConnectionError::LocallyClosed { code: VarInt::ZERO });
        }
        self.datagram_tx.push_back(data);
        Ok(())
    }

    pub fn recv_datagram(&mut self) -> Option<Vec<u8>> {
        self.datagram_rx.pop_front()
    }

    fn ensure_open(&self) -> Result<(), ConnectionError> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        Ok(())
    }

    /// Closes the connection with an application error
    //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2
    //# An endpoint sends a CONNECTION_CLOSE frame (Section 19.19) to
    //# terminate the connection immediately.
    pub fn close(&mut self, error: application::Error, reason: &'static str, now: Timestamp) {
        if self.is_draining() {
            return;
        }
        let error = transport::Error::application_error(error.as_varint(), reason);
        self.enter_closing(error, now);
        self.error = Some(ConnectionError::LocallyClosed { code: error.code });
    }

    fn close_with_transport_error(&mut self, error: transport::Error, now: Timestamp) {
        if self.is_draining() {
            return;
        }
        warn!(code = %error.code, reason = error.reason, "closing connection");
        self.enter_closing(error, now);
        self.error = Some(ConnectionError::LocallyClosed { code: error.code });
    }

    fn enter_closing(&mut self, error: transport::Error, now: Timestamp) {
        let drain = self.drain_interval();
        self.state = State::Closing {
            error,
            until: now + drain,
        };
        self.close_response_pending = true;
        self.streams.close();
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2
    //# The closing and draining connection states exist to ensure that
    //# connections close cleanly and that delayed or reordered packets are
    //# properly discarded.  These states SHOULD persist for at least three
    //# times the current PTO interval
    fn drain_interval(&self) -> Duration {
        self.rtt.pto_period(self.pto_backoff, PacketNumberSpace::ApplicationData) * 3
    }

    // ===== datagram ingestion =====

    /// Processes one received UDP datagram
    pub fn on_datagram(
        &mut self,
        datagram: &mut [u8],
        remote_address: SocketAddr,
        ecn: ExplicitCongestionNotification,
        now: Timestamp,
    ) {
        match self.state {
            State::Drained | State::Draining { .. } => return,
            State::Closing { .. } => {
                // respond to anything that arrives with another close
                self.close_response_pending = true;
                return;
            }
            _ => {}
        }

        self.last_activity = now;
        let is_new_path = self.paths.on_datagram_received(
            remote_address,
            datagram.len(),
            &mut self.random,
            now,
            PATH_CHALLENGE_TIMEOUT,
        );
        if is_new_path {
            debug!(%remote_address, "datagram from new path, starting validation");
        }

        let mut buffer = quell_codec::DecoderBufferMut::new(datagram);

        while !buffer.is_empty() {
            let cid_len = self.local_cids.cid_len();
            let (packet, remaining) = match ProtectedPacket::decode(buffer, cid_len) {
                Ok(decoded) => decoded,
                Err(_) => {
                    // an undecodable remainder is dropped; anything already
                    // processed stands
                    trace!("dropping undecodable datagram remainder");
                    return;
                }
            };
            buffer = remaining;

            //= https://www.rfc-editor.org/rfc/rfc9000#section-12.2
            //# The destination connection ID fields of all packets in a
            //# datagram [...] packets with a different destination are
            //# discarded
            if !self.local_cids.is_local(packet.destination_connection_id())
                && !packet.destination_connection_id().is_empty()
            {
                trace!("dropping packet with unknown destination connection id");
                continue;
            }

            if let Err(error) = self.on_packet(packet, remote_address, ecn, now) {
                self.close_with_transport_error(error, now);
                return;
            }

            if self.is_draining() {
                return;
            }
        }
    }

    fn on_packet(
        &mut self,
        packet: ProtectedPacket,
        remote_address: SocketAddr,
        ecn: ExplicitCongestionNotification,
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        match packet {
            ProtectedPacket::Initial(packet) => self.on_initial(packet, ecn, now),
            ProtectedPacket::Handshake(packet) => self.on_handshake(packet, ecn, now),
            ProtectedPacket::Short(packet) => {
                self.on_one_rtt(packet, remote_address, ecn, now)
            }
            ProtectedPacket::ZeroRtt(_) => {
                // 0-RTT acceptance is delegated to the application verifier,
                // which this endpoint does not enable
                trace!("dropping 0-rtt packet");
                Ok(())
            }
            ProtectedPacket::Retry(packet) => self.on_retry(packet),
            ProtectedPacket::VersionNegotiation(packet) => {
                self.on_version_negotiation(packet)
            }
        }
    }

    fn on_initial(
        &mut self,
        packet: quell_quic_core::packet::ProtectedInitial,
        ecn: ExplicitCongestionNotification,
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        let header = packet.header.clone();

        let Some(space) = self.spaces.initial.as_mut() else {
            trace!("dropping initial packet after space discard");
            return Ok(());
        };

        let Some(opener) = space.opener() else {
            return Ok(());
        };

        let largest = space.expected_packet_number();
        let Ok(encrypted) = packet.unprotect(&opener.header, largest) else {
            trace!("failed to unprotect initial packet");
            return Ok(());
        };
        let Ok(cleartext) = encrypted.decrypt(&opener.packet) else {
            trace!("failed to decrypt initial packet");
            return Ok(());
        };

        let packet_number = cleartext.packet_number;
        if space.received_contains(packet_number) {
            return Ok(());
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-7.2
        //# A client MUST change the Destination Connection ID it uses for
        //# sending packets in response to only the first received Initial or
        //# Retry packet.
        if self.endpoint_type.is_client() {
            self.peer_cids.on_handshake_id_update(header.source_connection_id);
        } else {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
            //# A server might wish to validate the client address before
            //# starting the cryptographic handshake.
            // the handshake itself validates the address once it completes
        }

        let payload = cleartext.payload;
        let elicitation =
            self.process_payload(EncryptionLevel::Initial, payload, now)?;

        if let Some(space) = self.spaces.initial.as_mut() {
            space.on_packet_received(packet_number, elicitation, ecn, now, Duration::ZERO);
        }

        Ok(())
    }

    fn on_handshake(
        &mut self,
        packet: quell_quic_core::packet::ProtectedHandshake,
        ecn: ExplicitCongestionNotification,
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        let Some(space) = self.spaces.handshake.as_mut() else {
            trace!("dropping handshake packet after space discard");
            return Ok(());
        };
        let Some(opener) = space.opener() else {
            trace!("dropping handshake packet before keys are available");
            return Ok(());
        };

        let largest = space.expected_packet_number();
        let Ok(encrypted) = packet.unprotect(&opener.header, largest) else {
            return Ok(());
        };
        let Ok(cleartext) = encrypted.decrypt(&opener.packet) else {
            return Ok(());
        };

        let packet_number = cleartext.packet_number;
        if space.received_contains(packet_number) {
            return Ok(());
        }

        //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9.1
        //# a client MUST discard Initial keys when it first sends a
        //# Handshake packet [...] a server MUST discard Initial keys when it
        //# first successfully processes a Handshake packet.
        if self.endpoint_type.is_server() {
            self.discard_initial_space();
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
        //# Once an endpoint has successfully processed a Handshake packet
        //# from the peer, it can consider the peer address to have been
        //# validated.
        self.paths.on_peer_validated();

        let elicitation =
            self.process_payload(EncryptionLevel::Handshake, cleartext.payload, now)?;

        if let Some(space) = self.spaces.handshake.as_mut() {
            space.on_packet_received(packet_number, elicitation, ecn, now, Duration::ZERO);
        }

        Ok(())
    }

    fn on_one_rtt(
        &mut self,
        packet: quell_quic_core::packet::ProtectedShort,
        remote_address: SocketAddr,
        ecn: ExplicitCongestionNotification,
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        if self.spaces.application.one_rtt_keys().is_none() {
            trace!("dropping 1-rtt packet before keys are available");
            return Ok(());
        }

        let largest = self.spaces.application.expected_packet_number();

        let keys = self
            .spaces
            .application
            .one_rtt_keys()
            .expect("checked above");
        let Ok(mut encrypted) = packet.unprotect(&keys.opener().header, largest) else {
            return Ok(());
        };

        let packet_number = encrypted.packet_number;
        if self.spaces.application.received_contains(packet_number) {
            return Ok(());
        }

        let keys = self
            .spaces
            .application
            .one_rtt_keys_mut()
            .expect("checked above");

        //= https://www.rfc-editor.org/rfc/rfc9001#section-6.3
        //# An endpoint MUST retain old keys until it has successfully
        //# unprotected a packet sent using the new keys.
        let cleartext = if encrypted.key_phase == keys.key_phase() {
            match encrypted.decrypt_in_place(&keys.opener().packet) {
                Ok(len) => encrypted.into_cleartext(len),
                Err(_) => {
                    keys.on_decryption_failure()?;
                    return Ok(());
                }
            }
        } else {
            // the key phase flipped: try the current keys first (late
            // packets), then the next generation
            let saved = encrypted.payload_copy();
            match encrypted.decrypt_in_place(&keys.opener().packet) {
                Ok(len) => encrypted.into_cleartext(len),
                Err(_) => {
                    encrypted.restore_payload(&saved);
                    let next = keys.next_generation_opener();
                    match encrypted.decrypt_in_place(&next.packet) {
                        Ok(len) => {
                            debug!("peer initiated key update");
                            keys.on_peer_update_confirmed();
                            encrypted.into_cleartext(len)
                        }
                        Err(_) => {
                            keys.on_decryption_failure()?;
                            return Ok(());
                        }
                    }
                }
            }
        };

        let elicitation = self.process_payload_one_rtt(
            cleartext.payload,
            remote_address,
            now,
        )?;

        let max_ack_delay = self.limits.max_ack_delay;
        self.spaces.application.on_packet_received(
            packet_number,
            elicitation,
            ecn,
            now,
            max_ack_delay,
        );

        Ok(())
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-17.2.5.2
    //# A client MUST accept and process at most one Retry packet for each
    //# connection attempt.
    fn on_retry(
        &mut self,
        packet: quell_quic_core::packet::ProtectedRetry,
    ) -> Result<(), transport::Error> {
        if self.endpoint_type.is_server()
            || self.retry_source_connection_id.is_some()
            || self.handshake.is_complete()
        {
            return Ok(());
        }

        // only valid before any other server packet arrives
        let Some(space) = self.spaces.initial.as_mut() else {
            return Ok(());
        };

        let pseudo = packet.pseudo_packet(&self.original_destination_connection_id);
        if quell_quic_crypto::retry::validate(&pseudo, packet.integrity_tag()).is_err() {
            trace!("dropping retry packet with an invalid integrity tag");
            return Ok(());
        }

        debug!("server requested retry");

        let new_dcid = packet.header.source_connection_id;
        self.retry_source_connection_id = Some(new_dcid);
        self.token = packet.token().to_vec();
        self.peer_cids.on_handshake_id_update(new_dcid);

        //= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
        //# The secret used for Initial packets changes
        //# when a server sends a Retry packet to use the connection ID value
        //# selected by the server
        space.install_keys(KeyPair::new_initial(
            self.endpoint_type,
            new_dcid.as_slice(),
        ));

        // the entire first flight is retransmitted under the new keys
        let stream = self.handshake.stream_mut(EncryptionLevel::Initial);
        stream.retransmit_all();

        Ok(())
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-6.2
    //# A client MUST discard a Version Negotiation packet that lists the
    //# QUIC version selected by the client.
    fn on_version_negotiation(
        &mut self,
        packet: quell_quic_core::packet::VersionNegotiation,
    ) -> Result<(), transport::Error> {
        if self.endpoint_type.is_server() || self.handshake.is_complete() {
            return Ok(());
        }

        if packet.supports(QUIC_VERSION) {
            return Ok(());
        }

        self.error = Some(ConnectionError::VersionNegotiation(
            packet.supported_versions,
        ));
        self.state = State::Drained;
        Ok(())
    }

    // ===== frame processing =====

    fn process_payload(
        &mut self,
        level: EncryptionLevel,
        payload: &[u8],
        now: Timestamp,
    ) -> Result<AckElicitation, transport::Error> {
        let mut elicitation = AckElicitation::NonEliciting;
        let mut saw_frame = false;

        for frame in FrameIter::new(quell_codec::DecoderBuffer::new(payload)) {
            let frame = frame.map_err(transport::Error::from)?;
            saw_frame = true;
            elicitation = elicitation.merge(frame.ack_elicitation());

            //= https://www.rfc-editor.org/rfc/rfc9000#section-12.4
            //# An endpoint MUST treat receipt of a frame in a packet type
            //# that is not permitted as a connection error of type
            //# PROTOCOL_VIOLATION
            if !frame.is_allowed_in_initial_or_handshake() {
                return Err(transport_error!(
                    PROTOCOL_VIOLATION,
                    "frame not permitted at this encryption level"
                ));
            }

            match frame {
                Frame::Padding(_) | Frame::Ping(_) => {}
                Frame::Ack(ack) => self.on_ack_frame(level.space(), &ack, now)?,
                Frame::Crypto(crypto) => {
                    self.on_crypto_frame(level, crypto.offset, crypto.data, now)?
                }
                Frame::ConnectionClose(close) => {
                    self.on_connection_close(&close, now);
                    return Ok(elicitation);
                }
                _ => unreachable!("all other frames fail the level check above"),
            }
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-12.4
        //# An endpoint MUST treat receipt of a packet containing no frames
        //# as a connection error of type PROTOCOL_VIOLATION.
        if !saw_frame {
            return Err(transport_error!(PROTOCOL_VIOLATION, "packet with no frames"));
        }

        Ok(elicitation)
    }

    fn process_payload_one_rtt(
        &mut self,
        payload: &[u8],
        remote_address: SocketAddr,
        now: Timestamp,
    ) -> Result<AckElicitation, transport::Error> {
        let mut elicitation = AckElicitation::NonEliciting;
        let mut saw_frame = false;

        for frame in FrameIter::new(quell_codec::DecoderBuffer::new(payload)) {
            let frame = frame.map_err(transport::Error::from)?;
            saw_frame = true;
            elicitation = elicitation.merge(frame.ack_elicitation());

            match frame {
                Frame::Padding(_) | Frame::Ping(_) => {}
                Frame::Ack(ack) => {
                    self.on_ack_frame(PacketNumberSpace::ApplicationData, &ack, now)?
                }
                Frame::Crypto(crypto) => {
                    self.on_crypto_frame(EncryptionLevel::OneRtt, crypto.offset, crypto.data, now)?
                }
                Frame::Stream(stream) => {
                    let id = StreamId::from_varint(stream.stream_id);
                    let newly = self.streams.on_stream_data(
                        id,
                        stream.offset,
                        stream.data,
                        stream.is_fin,
                    )?;
                    self.on_connection_bytes_received(newly)?;
                }
                Frame::ResetStream(reset) => {
                    let id = StreamId::from_varint(reset.stream_id);
                    let (newly, unread) = self.streams.on_reset_stream(
                        id,
                        application::Error::new(reset.application_error_code),
                        reset.final_size,
                    )?;
                    self.on_connection_bytes_received(newly)?;
                    // the unread allowance is reclaimed immediately
                    self.conn_rx.on_data_consumed(unread as usize);
                }
                Frame::StopSending(stop) => {
                    let id = StreamId::from_varint(stop.stream_id);
                    self.streams
                        .on_stop_sending(id, application::Error::new(stop.application_error_code))?;
                }
                Frame::MaxData(frame) => {
                    self.conn_tx.on_limit_update(frame.maximum_data);
                }
                Frame::MaxStreamData(frame) => {
                    let id = StreamId::from_varint(frame.stream_id);
                    self.streams
                        .on_max_stream_data(id, frame.maximum_stream_data)?;
                }
                Frame::MaxStreams(frame) => {
                    self.streams
                        .on_max_streams(frame.stream_type, frame.maximum_streams);
                }
                Frame::DataBlocked(frame) => {
                    trace!(limit = %frame.data_limit, "peer reports data blocked");
                }
                Frame::StreamDataBlocked(frame) => {
                    trace!(
                        stream = %frame.stream_id,
                        limit = %frame.stream_data_limit,
                        "peer reports stream data blocked"
                    );
                }
                Frame::StreamsBlocked(frame) => {
                    trace!(limit = %frame.stream_limit, "peer reports streams blocked");
                }
                Frame::NewConnectionId(frame) => {
                    self.peer_cids.on_new_connection_id(&frame)?;
                }
                Frame::RetireConnectionId(frame) => {
                    self.local_cids
                        .on_retire_connection_id(frame.sequence_number)?;
                }
                Frame::PathChallenge(challenge) => {
                    //= https://www.rfc-editor.org/rfc/rfc9000#section-8.2.2
                    //# On receiving a PATH_CHALLENGE frame, an endpoint MUST
                    //# respond by echoing the data contained in the
                    //# PATH_CHALLENGE frame in a PATH_RESPONSE frame.
                    self.pending.path_responses.push_back(challenge.data);
                }
                Frame::PathResponse(response) => {
                    let has_unused = self.peer_cids.has_unused();
                    if self.paths.on_path_response(
                        remote_address,
                        &response.data,
                        now,
                        has_unused,
                    ) {
                        debug!(%remote_address, "path validated");
                        if self.paths.primary().remote_address == remote_address
                            && has_unused
                        {
                            self.peer_cids.use_unused_id();
                        }
                    }
                }
                Frame::ConnectionClose(close) => {
                    self.on_connection_close(&close, now);
                    return Ok(elicitation);
                }
                Frame::HandshakeDone(_) => {
                    //= https://www.rfc-editor.org/rfc/rfc9000#section-19.20
                    //# A server MUST treat receipt of a HANDSHAKE_DONE frame
                    //# as a connection error of type PROTOCOL_VIOLATION.
                    if self.endpoint_type.is_server() {
                        return Err(transport_error!(
                            PROTOCOL_VIOLATION,
                            "handshake_done received by a server"
                        ));
                    }
                    if !self.handshake.is_confirmed() {
                        debug!("handshake confirmed");
                        self.handshake.on_confirmed();
                        self.discard_handshake_space();
                    }
                }
                Frame::NewToken(frame) => {
                    //= https://www.rfc-editor.org/rfc/rfc9000#section-19.7
                    //# A server MUST treat receipt of a NEW_TOKEN frame as a
                    //# connection error of type PROTOCOL_VIOLATION.
                    if self.endpoint_type.is_server() {
                        return Err(transport_error!(
                            PROTOCOL_VIOLATION,
                            "new_token received by a server"
                        ));
                    }
                    self.pending.received_tokens.push_back(frame.token.to_vec());
                }
                Frame::Datagram(datagram) => {
                    //= https://www.rfc-editor.org/rfc/rfc9221#section-3
                    //# An endpoint that receives a DATAGRAM frame when it has
                    //# not indicated support via the transport parameter MUST
                    //# terminate the connection with an error of type
                    //# PROTOCOL_VIOLATION.
                    if self.local_parameters.max_datagram_frame_size == VarInt::ZERO {
                        return Err(transport_error!(
                            PROTOCOL_VIOLATION,
                            "datagram support was not negotiated"
                        ));
                    }
                    self.datagram_rx.push_back(datagram.data.to_vec());
                }
            }
        }

        if !saw_frame {
            return Err(transport_error!(PROTOCOL_VIOLATION, "packet with no frames"));
        }

        Ok(elicitation)
    }

    fn on_connection_bytes_received(&mut self, newly: u64) -> Result<(), transport::Error> {
        if newly == 0 {
            return Ok(());
        }
        self.conn_bytes_received += newly;
        self.conn_rx
            .on_data_received(VarInt::new(self.conn_bytes_received).map_err(|_| {
                transport_error!(FLOW_CONTROL_ERROR, "connection byte count overflow")
            })?)
    }

    fn on_ack_frame<A: frame::ack::AckRanges>(
        &mut self,
        space: PacketNumberSpace,
        ack: &frame::Ack<A>,
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        let exponent = self
            .peer_parameters
            .as_ref()
            .map_or(3, |parameters| parameters.ack_delay_exponent);
        let ack_delay = Duration::from_micros(ack.ack_delay_micros(exponent));
        let handshake_confirmed = self.handshake.is_confirmed();

        let Some(packet_space) = self.spaces.get_mut(space) else {
            return Ok(());
        };

        let outcome = packet_space.recovery.on_ack_received(
            ack,
            ack_delay,
            now,
            handshake_confirmed,
            &mut self.rtt,
            &mut self.congestion_controller,
        )?;

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# The PTO backoff factor is reset when an acknowledgment is
        //# received, except in the following case.  A server might take
        //# longer to respond to packets during the handshake than otherwise.
        if outcome.newly_acked_ack_eliciting {
            self.pto_backoff = 1;
        }

        for (packet_number, info) in &outcome.acked {
            if space.is_application_data() {
                if let Some(keys) = self.spaces.application.one_rtt_keys_mut() {
                    keys.on_packet_acked(packet_number.as_u64());
                }
            }
            for entry in &info.retransmit {
                self.on_frame_acked(entry);
            }
        }

        for (_, info) in &outcome.lost {
            debug!(bytes = info.sent_bytes, "packet declared lost");
            for entry in &info.retransmit {
                self.on_frame_lost(entry);
            }
        }

        //= https://www.rfc-editor.org/rfc/rfc9001#section-4.1.2
        //# the TLS handshake is considered confirmed at the server when the
        //# handshake completes.  The server MUST send a HANDSHAKE_DONE
        //# frame as soon as the handshake is complete.
        if self.endpoint_type.is_server()
            && self.handshake.is_complete()
            && !self.handshake.is_confirmed()
        {
            self.handshake.on_confirmed();
            self.discard_handshake_space();
        }

        Ok(())
    }

    fn on_frame_acked(&mut self, entry: &Retransmit) {
        match entry {
            Retransmit::Stream { id, offset, len, is_fin } => {
                self.streams.on_stream_data_acked(*id, *offset, *len, *is_fin);
            }
            Retransmit::ResetStream { id } => self.streams.on_reset_acked(*id),
            Retransmit::Crypto { .. }
            | Retransmit::StopSending { .. }
            | Retransmit::MaxData
            | Retransmit::MaxStreamData { .. }
            | Retransmit::MaxStreams { .. }
            | Retransmit::HandshakeDone
            | Retransmit::NewConnectionId { .. }
            | Retransmit::RetireConnectionId { .. }
            | Retransmit::NewToken
            | Retransmit::Ping => {}
        }
    }

    fn on_frame_lost(&mut self, entry: &Retransmit) {
        match entry {
            Retransmit::Stream { id, offset, len, is_fin } => {
                self.streams.on_stream_data_lost(*id, *offset, *len, *is_fin);
            }
            Retransmit::Crypto { level, offset, len } => {
                self.handshake.stream_mut(*level).on_frame_lost(*offset, *len);
            }
            Retransmit::ResetStream { id } => self.streams.on_reset_lost(*id),
            Retransmit::StopSending { id } => self.streams.on_stop_sending_lost(*id),
            Retransmit::MaxData => self.conn_rx.request_update(),
            Retransmit::MaxStreamData { id } => self.streams.on_max_stream_data_lost(*id),
            Retransmit::MaxStreams { stream_type } => {
                self.streams.on_max_streams_lost(*stream_type)
            }
            Retransmit::HandshakeDone => self.pending.handshake_done = true,
            Retransmit::NewConnectionId { sequence_number } => {
                self.local_cids.on_new_connection_id_lost(*sequence_number);
            }
            Retransmit::RetireConnectionId { sequence_number } => {
                self.peer_cids.on_retire_connection_id_lost(*sequence_number);
            }
            Retransmit::NewToken | Retransmit::Ping => {}
        }
    }

    fn on_crypto_frame(
        &mut self,
        level: EncryptionLevel,
        offset: VarInt,
        data: &[u8],
        now: Timestamp,
    ) -> Result<(), transport::Error> {
        self.handshake
            .stream_mut(level)
            .on_frame_received(offset.as_u64(), data)?;

        let ordered = self.handshake.stream_mut(level).take_received();
        if !ordered.is_empty() {
            self.drive_tls(|session, context| {
                session.on_handshake_data(level, &ordered, context)
            })?;
        }

        let _ = now;
        Ok(())
    }

    fn on_connection_close(&mut self, close: &frame::ConnectionClose, now: Timestamp) {
        debug!(code = %close.error_code, "peer closed the connection");

        self.error = Some(if close.is_application_error() {
            ConnectionError::Application {
                code: close.error_code,
                reason: close.reason.to_vec(),
            }
        } else {
            ConnectionError::Transport {
                code: close.error_code,
                reason: close.reason.to_vec(),
            }
        });

        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2.2
        //# The draining state is entered once an endpoint receives a
        //# CONNECTION_CLOSE frame, which indicates that its peer is closing
        //# or draining.
        let until = now + self.drain_interval();
        self.state = State::Draining { until };
        self.streams.close();
    }

    // ===== TLS plumbing =====

    fn drive_tls<F>(&mut self, operation: F) -> Result<(), transport::Error>
    where
        F: FnOnce(
            &mut dyn tls::Session,
            &mut dyn tls::Context,
        ) -> Result<(), transport::Error>,
    {
        let mut session = self.tls.take().expect("tls session is always present");

        let mut collector = TlsCollector {
            local_parameters: self.encoded_local_parameters(),
            ..Default::default()
        };

        let result = operation(session.as_mut(), &mut collector);
        self.tls = Some(session);
        result?;

        self.apply_tls_collector(collector)
    }

    fn encoded_local_parameters(&self) -> Vec<u8> {
        let mut buffer = alloc::vec![0u8; 256];
        let mut encoder = quell_codec::EncoderBuffer::new(&mut buffer);
        self.local_parameters.encode(self.endpoint_type, &mut encoder);
        let len = quell_codec::Encoder::len(&encoder);
        buffer.truncate(len);
        buffer
    }

    fn apply_tls_collector(&mut self, collector: TlsCollector) -> Result<(), transport::Error> {
        for (level, data) in collector.emitted {
            self.handshake.stream_mut(level).write(&data);
        }

        for (level, secrets) in collector.secrets {
            match level {
                EncryptionLevel::Initial => {}
                EncryptionLevel::Handshake => {
                    debug!("handshake keys available");
                    if let Some(space) = self.spaces.handshake.as_mut() {
                        space.install_keys(KeyPair::new(&secrets.local, &secrets.peer));
                    }
                }
                EncryptionLevel::ZeroRtt => {
                    // 0-RTT acceptance is left to the application verifier
                }
                EncryptionLevel::OneRtt => {
                    debug!("1-rtt keys available");
                    self.spaces
                        .application
                        .install_one_rtt_keys(secrets.local, secrets.peer);
                }
            }
        }

        if let Some(encoded) = collector.peer_parameters {
            let parameters = TransportParameters::decode(
                quell_codec::DecoderBuffer::new(&encoded),
                self.endpoint_type.peer_type(),
            )?;
            self.on_peer_parameters(parameters)?;
        }

        if let Some(protocol) = collector.application_protocol {
            self.application_protocol = Some(protocol);
        }

        if collector.complete && !self.handshake.is_complete() {
            debug!("handshake complete");
            self.handshake.on_complete();
            self.state = State::Active;

            if self.endpoint_type.is_server() {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-19.20
                //# The server MUST NOT send a HANDSHAKE_DONE frame before
                //# completing the handshake.
                self.pending.handshake_done = true;
            }

            // issue additional connection ids once the peer's limit is known
            let limit = self
                .peer_parameters
                .as_ref()
                .map_or(VarInt::from_u8(2), |p| p.active_connection_id_limit);
            self.local_cids.issue(limit, &mut self.random);
        }

        Ok(())
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-7.3
    //# An endpoint MUST treat the following as a connection error of type
    //# TRANSPORT_PARAMETER_ERROR or PROTOCOL_VIOLATION: [...] absence of
    //# the retry_source_connection_id transport parameter after a Retry
    //# packet, [...] a mismatch between values received from a peer in
    //# these transport parameters and the value sent in the corresponding
    //# Destination or Source Connection ID fields of Initial packets.
    fn on_peer_parameters(
        &mut self,
        parameters: TransportParameters,
    ) -> Result<(), transport::Error> {
        if self.endpoint_type.is_client() {
            if parameters.original_destination_connection_id
                != Some(self.original_destination_connection_id)
            {
                return Err(transport_error!(
                    TRANSPORT_PARAMETER_ERROR,
                    "original_destination_connection_id mismatch"
                ));
            }
            if parameters.retry_source_connection_id != self.retry_source_connection_id {
                return Err(transport_error!(
                    TRANSPORT_PARAMETER_ERROR,
                    "retry_source_connection_id mismatch"
                ));
            }
        }

        self.conn_tx.on_limit_update(parameters.initial_max_data);
        self.streams.on_peer_parameters(&parameters);
        self.rtt.on_max_ack_delay(parameters.max_ack_delay());
        self.peer_parameters = Some(parameters);
        Ok(())
    }

    // ===== space lifecycle =====

    fn discard_initial_space(&mut self) {
        if let Some(mut space) = self.spaces.initial.take() {
            debug!("discarding initial space");
            space.discard(&mut self.congestion_controller);
        }
    }

    fn discard_handshake_space(&mut self) {
        //= https://www.rfc-editor.org/rfc/rfc9001#section-4.9.2
        //# An endpoint MUST discard its Handshake keys when the TLS
        //# handshake is confirmed
        if let Some(mut space) = self.spaces.handshake.take() {
            debug!("discarding handshake space");
            space.discard(&mut self.congestion_controller);
        }
        // handshake-level crypto data can no longer be retransmitted
    }

    // ===== timers =====

    /// The earliest deadline at which `on_timeout` must run
    pub fn next_timeout(&self) -> Option<Timestamp> {
        let mut earliest: Option<Timestamp> = None;
        let mut consider = |candidate: Option<Timestamp>| {
            if let Some(candidate) = candidate {
                earliest = Some(earliest.map_or(candidate, |e| e.min(candidate)));
            }
        };

        match &self.state {
            State::Drained => return None,
            State::Closing { until, .. } | State::Draining { until } => {
                return Some(*until);
            }
            _ => {}
        }

        for space in [
            self.spaces.initial.as_ref(),
            self.spaces.handshake.as_ref(),
            Some(&self.spaces.application),
        ]
        .into_iter()
        .flatten()
        {
            consider(space.ack_deadline());
            consider(space.recovery.loss_time());
            consider(space.recovery.pto_deadline(self.pto_backoff, &self.rtt));
        }

        consider(self.paths.next_deadline());
        consider(self.idle_deadline());
        consider(self.keep_alive_deadline());
        consider(self.pacer.earliest_departure_time());

        earliest
    }

    /// Runs every timer whose deadline has passed
    pub fn on_timeout(&mut self, now: Timestamp) {
        match &self.state {
            State::Drained => return,
            State::Closing { until, .. } | State::Draining { until } => {
                if *until <= now {
                    debug!("drain interval elapsed");
                    self.state = State::Drained;
                }
                return;
            }
            _ => {}
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.1
        //# If a max_idle_timeout is specified by either endpoint in its
        //# transport parameters, the connection is silently closed and its
        //# state is discarded when it remains idle
        if self.idle_deadline().map_or(false, |deadline| deadline <= now) {
            debug!("idle timeout");
            self.error = Some(ConnectionError::IdleTimeout);
            self.state = State::Drained;
            self.streams.close();
            return;
        }

        // time-threshold loss detection
        let mut lost_entries: Vec<Retransmit> = Vec::new();
        for space in [
            self.spaces.initial.as_mut(),
            self.spaces.handshake.as_mut(),
            Some(&mut self.spaces.application),
        ]
        .into_iter()
        .flatten()
        {
            if space
                .recovery
                .loss_time()
                .map_or(false, |deadline| deadline <= now)
            {
                let lost = space.recovery.on_loss_timeout(
                    now,
                    &self.rtt,
                    &mut self.congestion_controller,
                );
                lost_entries.extend(
                    lost.into_iter()
                        .flat_map(|(_, info)| info.retransmit.into_iter()),
                );
            }
        }
        for entry in &lost_entries {
            self.on_frame_lost(entry);
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# When a PTO timer expires, a sender MUST send at least one ack-
        //# eliciting packet in the packet number space as a probe.
        let pto_fired = [
            PacketNumberSpace::Initial,
            PacketNumberSpace::Handshake,
            PacketNumberSpace::ApplicationData,
        ]
        .into_iter()
        .find(|&space_kind| {
            self.spaces.get_mut(space_kind).is_some_and(|space| {
                space
                    .recovery
                    .pto_deadline(self.pto_backoff, &self.rtt)
                    .map_or(false, |deadline| deadline <= now)
            })
        });

        if let Some(space_kind) = pto_fired {
            debug!(?space_kind, backoff = self.pto_backoff, "pto fired");
            //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.4
            //# When a PTO timer expires, the PTO backoff MUST be increased,
            //# resulting in the PTO period being set to twice its current
            //# value.
            self.pto_backoff = self.pto_backoff.saturating_mul(2);
            self.pto_probes[space_kind.as_index()] =
                quell_quic_core::recovery::MAX_PTO_PROBES as u8;
        }

        // path validation timers
        self.paths
            .on_timeout(&mut self.random, now, PATH_CHALLENGE_TIMEOUT);

        // keep-alive
        if self
            .keep_alive_deadline()
            .map_or(false, |deadline| deadline <= now)
        {
            self.pending.ping = true;
            self.last_activity = now;
        }
    }

    fn idle_deadline(&self) -> Option<Timestamp> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.1
        //# Each endpoint advertises a max_idle_timeout, but the effective
        //# value at an endpoint is computed as the minimum of the two
        //# advertised values
        let mut timeout = self.limits.max_idle_timeout;
        if let Some(peer) = self
            .peer_parameters
            .as_ref()
            .and_then(|parameters| parameters.max_idle_timeout())
        {
            timeout = timeout.min(peer);
        }
        if timeout == Duration::ZERO {
            return None;
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-10.1
        //# To avoid excessively small idle timeout periods, endpoints MUST
        //# increase the idle timeout period to be at least three times the
        //# current Probe Timeout (PTO).
        let pto3 = self
            .rtt
            .pto_period(self.pto_backoff, PacketNumberSpace::ApplicationData)
            * 3;
        Some(self.last_activity + timeout.max(pto3))
    }

    fn keep_alive_deadline(&self) -> Option<Timestamp> {
        let interval = self.limits.keep_alive_interval?;
        if !self.handshake.is_confirmed() {
            return None;
        }
        Some(self.last_activity + interval)
    }
}
