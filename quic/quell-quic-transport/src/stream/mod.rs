// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-connection stream state
//!
//! Streams are stored in an id-keyed arena; stream operations borrow the
//! manager mutably rather than holding references back to the connection.

pub mod range_set;
pub mod recv;
pub mod send;

pub use recv::{ReceiveStream, RecvError};
pub use send::{SendError, SendStream, StreamChunk};

use crate::flow::{RxWindow, TxWindow};
use alloc::{collections::VecDeque, vec::Vec};
use hashbrown::HashMap;
use quell_quic_core::{
    application, endpoint,
    stream::{StreamId, StreamType},
    transport, transport_error,
    transport::parameters::TransportParameters,
    varint::VarInt,
};

/// Limits applied to streams opened by the peer, taken from our transport
/// parameters
#[derive(Clone, Copy, Debug)]
pub struct LocalStreamLimits {
    pub max_stream_data_bidi_remote: VarInt,
    pub max_stream_data_bidi_local: VarInt,
    pub max_stream_data_uni: VarInt,
    pub max_streams_bidi: VarInt,
    pub max_streams_uni: VarInt,
}

struct StreamEntry {
    send: Option<SendStream>,
    recv: Option<ReceiveStream>,
}

impl StreamEntry {
    fn is_finished(&self) -> bool {
        let send_done = self
            .send
            .as_ref()
            .map_or(true, |send| send.state().is_terminal());
        let recv_done = self
            .recv
            .as_ref()
            .map_or(true, |recv| recv.state().is_terminal());
        send_done && recv_done
    }
}

/// Why a stream could not be opened
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenError {
    /// The peer's MAX_STREAMS limit is exhausted; retry after an update
    StreamsExhausted,
}

pub struct StreamManager {
    local: endpoint::Type,
    streams: HashMap<u64, StreamEntry>,
    /// Limits we advertise for peer-opened streams
    local_limits: LocalStreamLimits,
    /// Stream-data limits the peer advertises for streams we open toward it
    peer_parameters: TransportParameters,
    /// Stream-count credit granted by the peer, per stream type
    peer_max_streams_bidi: TxWindow,
    peer_max_streams_uni: TxWindow,
    /// Stream-count credit we grant to the peer
    local_max_streams_bidi: RxWindow,
    local_max_streams_uni: RxWindow,
    /// Count of locally opened streams per type
    opened_bidi: u64,
    opened_uni: u64,
    /// Count of peer-opened streams per type
    peer_opened_bidi: u64,
    peer_opened_uni: u64,
    /// Peer-opened streams not yet surfaced to the application
    accept_queue: VecDeque<StreamId>,
    /// Round-robin cursor for transmission fairness
    transmit_cursor: u64,
}

impl StreamManager {
    pub fn new(local: endpoint::Type, local_parameters: &TransportParameters) -> Self {
        let local_limits = LocalStreamLimits {
            max_stream_data_bidi_remote: local_parameters.initial_max_stream_data_bidi_remote,
            max_stream_data_bidi_local: local_parameters.initial_max_stream_data_bidi_local,
            max_stream_data_uni: local_parameters.initial_max_stream_data_uni,
            max_streams_bidi: local_parameters.initial_max_streams_bidi,
            max_streams_uni: local_parameters.initial_max_streams_uni,
        };

        Self {
            local,
            streams: HashMap::new(),
            local_limits,
            peer_parameters: TransportParameters::default(),
            peer_max_streams_bidi: TxWindow::new(VarInt::ZERO),
            peer_max_streams_uni: TxWindow::new(VarInt::ZERO),
            local_max_streams_bidi: RxWindow::new(local_limits.max_streams_bidi),
            local_max_streams_uni: RxWindow::new(local_limits.max_streams_uni),
            opened_bidi: 0,
            opened_uni: 0,
            peer_opened_bidi: 0,
            peer_opened_uni: 0,
            accept_queue: VecDeque::new(),
            transmit_cursor: 0,
        }
    }

    /// Installs the peer's transport parameters once the handshake
    /// delivers them
    pub fn on_peer_parameters(&mut self, parameters: &TransportParameters) {
        self.peer_max_streams_bidi
            .on_limit_update(parameters.initial_max_streams_bidi);
        self.peer_max_streams_uni
            .on_limit_update(parameters.initial_max_streams_uni);

        // streams opened before the parameters arrived start with zero
        // credit; raise them to the negotiated initial limits
        for entry in self.streams.values_mut() {
            if let Some(send) = entry.send.as_mut() {
                let limit = Self::initial_send_limit(self.local, parameters, send.id());
                send.flow.on_limit_update(limit);
            }
        }

        self.peer_parameters = parameters.clone();
    }

    fn initial_send_limit(
        local: endpoint::Type,
        peer: &TransportParameters,
        id: StreamId,
    ) -> VarInt {
        match (id.stream_type(), id.initiator() == local) {
            (StreamType::Unidirectional, _) => peer.initial_max_stream_data_uni,
            // data we send on a stream we initiated arrives on the peer's
            // "remote"-initiated receiving side
            (StreamType::Bidirectional, true) => peer.initial_max_stream_data_bidi_remote,
            (StreamType::Bidirectional, false) => peer.initial_max_stream_data_bidi_local,
        }
    }

    fn receive_window_for(&self, id: StreamId) -> VarInt {
        Self::receive_window_for_limits(self.local, &self.local_limits, id)
    }

    fn receive_window_for_limits(
        local: endpoint::Type,
        local_limits: &LocalStreamLimits,
        id: StreamId,
    ) -> VarInt {
        match (id.stream_type(), id.initiator() == local) {
            (StreamType::Unidirectional, _) => local_limits.max_stream_data_uni,
            (StreamType::Bidirectional, true) => local_limits.max_stream_data_bidi_local,
            (StreamType::Bidirectional, false) => local_limits.max_stream_data_bidi_remote,
        }
    }

    /// Opens a locally initiated stream
    pub fn open(&mut self, stream_type: StreamType) -> Result<StreamId, OpenError> {
        let (window, opened) = match stream_type {
            StreamType::Bidirectional => (&mut self.peer_max_streams_bidi, &mut self.opened_bidi),
            StreamType::Unidirectional => (&mut self.peer_max_streams_uni, &mut self.opened_uni),
        };

        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.6
        //# An endpoint MUST NOT open more streams than permitted by the
        //# current stream limit set by its peer.
        if *opened >= window.limit().as_u64() {
            return Err(OpenError::StreamsExhausted);
        }

        let id = StreamId::nth(self.local, stream_type, *opened)
            .expect("stream counts stay within the varint range");
        *opened += 1;
        window.consume(1);

        let send = SendStream::new(
            id,
            Self::initial_send_limit(self.local, &self.peer_parameters, id),
        );
        let recv = stream_type
            .is_bidirectional()
            .then(|| ReceiveStream::new(id, self.receive_window_for(id)));

        self.streams.insert(u64::from(id), StreamEntry { send: Some(send), recv });

        Ok(id)
    }

    /// Returns the next peer-opened stream, if any
    pub fn accept(&mut self) -> Option<StreamId> {
        self.accept_queue.pop_front()
    }

    /// Ensures a stream exists for an id referenced by an inbound frame,
    /// applying the implicit-creation and stream-limit rules
    fn ensure_stream(&mut self, id: StreamId) -> Result<(), transport::Error> {
        if self.streams.contains_key(&u64::from(id)) {
            return Ok(());
        }

        let nth = id.as_nth();
        let stream_type = id.stream_type();

        if id.initiator() == self.local {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
            //# An endpoint MUST terminate the connection with error
            //# STREAM_STATE_ERROR if it receives a STREAM frame for a locally
            //# initiated stream that has not yet been created
            let opened = match stream_type {
                StreamType::Bidirectional => self.opened_bidi,
                StreamType::Unidirectional => self.opened_uni,
            };
            if nth >= opened {
                return Err(transport_error!(
                    STREAM_STATE_ERROR,
                    "frame references an unopened local stream"
                ));
            }
            // the stream existed and has been closed; its frames are stale
            return Ok(());
        }

        let (window, peer_opened) = match stream_type {
            StreamType::Bidirectional => {
                (&mut self.local_max_streams_bidi, &mut self.peer_opened_bidi)
            }
            StreamType::Unidirectional => {
                (&mut self.local_max_streams_uni, &mut self.peer_opened_uni)
            }
        };

        if nth < *peer_opened {
            // previously opened and since closed
            return Ok(());
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.6
        //# An endpoint that receives a frame with a stream ID exceeding the
        //# limit it has sent MUST treat this as a connection error of type
        //# STREAM_LIMIT_ERROR
        window
            .on_data_received(VarInt::new(nth + 1).map_err(|_| {
                transport_error!(STREAM_LIMIT_ERROR, "stream id out of range")
            })?)
            .map_err(|_| transport_error!(STREAM_LIMIT_ERROR, "peer exceeded stream limit"))?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-2.1
        //# A stream ID that is used out of order results in all streams of
        //# that type with lower-numbered stream IDs also being opened.
        let first_new = *peer_opened;
        for n in first_new..=nth {
            let id = StreamId::nth(self.local.peer_type(), stream_type, n)
                .expect("validated against the varint range above");

            let recv = ReceiveStream::new(
                id,
                Self::receive_window_for_limits(self.local, &self.local_limits, id),
            );
            let send = stream_type.is_bidirectional().then(|| {
                SendStream::new(
                    id,
                    Self::initial_send_limit(self.local, &self.peer_parameters, id),
                )
            });

            self.streams
                .insert(u64::from(id), StreamEntry { send, recv: Some(recv) });
            self.accept_queue.push_back(id);
        }
        *peer_opened = nth + 1;

        Ok(())
    }

    /// Dispatches an inbound STREAM frame.
    ///
    /// Returns the number of newly received bytes that count toward the
    /// connection flow-control window.
    pub fn on_stream_data(
        &mut self,
        id: StreamId,
        offset: VarInt,
        data: &[u8],
        is_fin: bool,
    ) -> Result<u64, transport::Error> {
        if !id.is_receivable_by(self.local) {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.8
            //# An endpoint MUST terminate the connection with error
            //# STREAM_STATE_ERROR if it receives a STREAM frame for a [...]
            //# send-only stream
            return Err(transport_error!(
                STREAM_STATE_ERROR,
                "stream data received on a send-only stream"
            ));
        }

        self.ensure_stream(id)?;

        let Some(entry) = self.streams.get_mut(&u64::from(id)) else {
            // frames for already-closed streams are ignored
            return Ok(0);
        };
        let Some(recv) = entry.recv.as_mut() else {
            return Ok(0);
        };

        let newly = recv.on_data(offset, data, is_fin)?;
        self.cleanup(id);
        Ok(newly)
    }

    /// Dispatches an inbound RESET_STREAM frame.
    ///
    /// Returns `(newly_received, unread)` connection credits; the second
    /// value is reclaimed as consumed by the connection window.
    pub fn on_reset_stream(
        &mut self,
        id: StreamId,
        error: application::Error,
        final_size: VarInt,
    ) -> Result<(u64, u64), transport::Error> {
        if !id.is_receivable_by(self.local) {
            return Err(transport_error!(
                STREAM_STATE_ERROR,
                "reset received on a send-only stream"
            ));
        }

        self.ensure_stream(id)?;

        let Some(entry) = self.streams.get_mut(&u64::from(id)) else {
            return Ok((0, 0));
        };
        let Some(recv) = entry.recv.as_mut() else {
            return Ok((0, 0));
        };

        let credits = recv.on_reset(error, final_size)?;
        self.cleanup(id);
        Ok(credits)
    }

    /// Dispatches an inbound STOP_SENDING frame
    pub fn on_stop_sending(
        &mut self,
        id: StreamId,
        error: application::Error,
    ) -> Result<(), transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.5
        //# An endpoint that receives a STOP_SENDING frame for a receive-only
        //# stream MUST terminate the connection with error STREAM_STATE_ERROR.
        if !id.is_sendable_by(self.local) {
            return Err(transport_error!(
                STREAM_STATE_ERROR,
                "stop_sending received for a receive-only stream"
            ));
        }

        self.ensure_stream(id)?;

        if let Some(entry) = self.streams.get_mut(&u64::from(id)) {
            if let Some(send) = entry.send.as_mut() {
                send.on_stop_sending(error);
            }
        }
        self.cleanup(id);
        Ok(())
    }

    /// Dispatches an inbound MAX_STREAM_DATA frame
    pub fn on_max_stream_data(
        &mut self,
        id: StreamId,
        limit: VarInt,
    ) -> Result<(), transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.10
        //# Receiving a MAX_STREAM_DATA frame for a receive-only stream MUST
        //# be treated as a connection error of type STREAM_STATE_ERROR.
        if !id.is_sendable_by(self.local) {
            return Err(transport_error!(
                STREAM_STATE_ERROR,
                "max_stream_data received for a receive-only stream"
            ));
        }

        self.ensure_stream(id)?;

        if let Some(entry) = self.streams.get_mut(&u64::from(id)) {
            if let Some(send) = entry.send.as_mut() {
                send.flow.on_limit_update(limit);
            }
        }
        Ok(())
    }

    /// Dispatches an inbound MAX_STREAMS frame
    pub fn on_max_streams(&mut self, stream_type: StreamType, limit: VarInt) {
        match stream_type {
            StreamType::Bidirectional => self.peer_max_streams_bidi.on_limit_update(limit),
            StreamType::Unidirectional => self.peer_max_streams_uni.on_limit_update(limit),
        };
    }

    // ===== application operations =====

    pub fn write(&mut self, id: StreamId, data: &[u8]) -> Result<usize, SendError> {
        self.send_stream(id)?.write(data)
    }

    pub fn finish(&mut self, id: StreamId) -> Result<(), SendError> {
        self.send_stream(id)?.finish()
    }

    pub fn reset(&mut self, id: StreamId, error: application::Error) -> Result<(), SendError> {
        self.send_stream(id)?.reset(error);
        Ok(())
    }

    pub fn read(&mut self, id: StreamId, out: &mut [u8]) -> Result<(usize, bool), RecvError> {
        let Some(entry) = self.streams.get_mut(&u64::from(id)) else {
            // the stream is gone because it finished cleanly
            return Ok((0, true));
        };
        let Some(recv) = entry.recv.as_mut() else {
            return Err(RecvError::WouldBlock);
        };
        let result = recv.read(out);
        self.cleanup(id);
        result
    }

    pub fn stop_sending(&mut self, id: StreamId, error: application::Error) {
        if let Some(entry) = self.streams.get_mut(&u64::from(id)) {
            if let Some(recv) = entry.recv.as_mut() {
                recv.stop_sending(error);
            }
        }
    }

    pub fn is_readable(&self, id: StreamId) -> bool {
        self.streams
            .get(&u64::from(id))
            .and_then(|entry| entry.recv.as_ref())
            .map_or(true, |recv| recv.is_readable())
    }

    pub fn write_capacity(&self, id: StreamId) -> u64 {
        self.streams
            .get(&u64::from(id))
            .and_then(|entry| entry.send.as_ref())
            .map_or(0, |send| send.capacity())
    }

    fn send_stream(&mut self, id: StreamId) -> Result<&mut SendStream, SendError> {
        self.streams
            .get_mut(&u64::from(id))
            .and_then(|entry| entry.send.as_mut())
            .ok_or(SendError::FinishedStream)
    }

    fn cleanup(&mut self, id: StreamId) {
        if let Some(entry) = self.streams.get(&u64::from(id)) {
            if entry.is_finished() {
                self.streams.remove(&u64::from(id));

                //= https://www.rfc-editor.org/rfc/rfc9000#section-4.6
                //# Streams are counted toward this limit as soon as they are
                //# opened [...] Endpoints MUST NOT wait for a stream to be
                //# closed before advertising additional credit
                // peer-opened streams release stream-count credit on close
                if id.initiator() != self.local {
                    match id.stream_type() {
                        StreamType::Bidirectional => {
                            self.local_max_streams_bidi.on_data_consumed(1)
                        }
                        StreamType::Unidirectional => {
                            self.local_max_streams_uni.on_data_consumed(1)
                        }
                    }
                }
            }
        }
    }

    // ===== transmission =====

    /// Returns true if any stream has data, fins, resets or stop-sendings
    /// waiting
    pub fn is_transmission_pending(&self) -> bool {
        self.streams.values().any(|entry| {
            entry
                .send
                .as_ref()
                .map_or(false, |send| send.is_transmission_pending())
        })
    }

    /// Produces the next STREAM chunk, rotating over streams for fairness.
    ///
    /// Returns the chunk and the connection credits consumed.
    pub fn next_chunk(
        &mut self,
        max_len: u64,
        connection_credit: u64,
    ) -> Option<(StreamChunk, u64)> {
        let mut ids: Vec<u64> = self
            .streams
            .iter()
            .filter(|(_, entry)| {
                entry
                    .send
                    .as_ref()
                    .map_or(false, |send| send.is_transmission_pending())
            })
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();

        // rotate so each stream gets a turn
        let start = ids
            .iter()
            .position(|&id| id > self.transmit_cursor)
            .unwrap_or(0);
        ids.rotate_left(start);

        for id in ids {
            let entry = self.streams.get_mut(&id)?;
            let send = entry.send.as_mut()?;
            if let Some(result) = send.transmit_chunk(max_len, connection_credit) {
                self.transmit_cursor = id;
                return Some(result);
            }
        }

        None
    }

    /// Collects pending RESET_STREAM frames
    pub fn pending_resets(&mut self) -> Vec<(StreamId, application::Error, VarInt)> {
        let mut resets = Vec::new();
        for entry in self.streams.values_mut() {
            if let Some(send) = entry.send.as_mut() {
                if let Some(error) = send.take_pending_reset() {
                    resets.push((send.id(), error, send.reset_final_size()));
                }
            }
        }
        resets
    }

    /// Collects pending STOP_SENDING frames
    pub fn pending_stop_sendings(&mut self) -> Vec<(StreamId, application::Error)> {
        let mut stops = Vec::new();
        for entry in self.streams.values_mut() {
            if let Some(recv) = entry.recv.as_mut() {
                if let Some(error) = recv.take_pending_stop_sending() {
                    stops.push((recv.id(), error));
                }
            }
        }
        stops
    }

    /// Collects pending MAX_STREAM_DATA window updates
    pub fn pending_window_updates(&mut self) -> Vec<(StreamId, VarInt)> {
        let mut updates = Vec::new();
        for entry in self.streams.values_mut() {
            if let Some(recv) = entry.recv.as_mut() {
                if let Some(limit) = recv.window_update() {
                    updates.push((recv.id(), limit));
                }
            }
        }
        updates
    }

    /// Collects pending MAX_STREAMS updates
    pub fn pending_max_streams(&mut self) -> Vec<(StreamType, VarInt)> {
        let mut updates = Vec::new();
        if let Some(limit) = self.local_max_streams_bidi.window_update() {
            updates.push((StreamType::Bidirectional, limit));
        }
        if let Some(limit) = self.local_max_streams_uni.window_update() {
            updates.push((StreamType::Unidirectional, limit));
        }
        updates
    }

    /// Re-queues a MAX_STREAM_DATA advertisement whose frame was lost or
    /// did not fit in a packet
    pub fn on_max_stream_data_lost(&mut self, id: StreamId) {
        if let Some(entry) = self.streams.get_mut(&u64::from(id)) {
            if let Some(recv) = entry.recv.as_mut() {
                recv.on_window_update_lost();
            }
        }
    }

    /// Re-queues a MAX_STREAMS advertisement whose frame was lost or did
    /// not fit in a packet
    pub fn on_max_streams_lost(&mut self, stream_type: StreamType) {
        match stream_type {
            StreamType::Bidirectional => self.local_max_streams_bidi.request_update(),
            StreamType::Unidirectional => self.local_max_streams_uni.request_update(),
        }
    }

    // ===== ack / loss callbacks =====

    pub fn on_stream_data_acked(&mut self, id: StreamId, offset: u64, len: u64, is_fin: bool) {
        if let Some(entry) = self.streams.get_mut(&u64::from(id)) {
            if let Some(send) = entry.send.as_mut() {
                send.on_data_acked(offset, len, is_fin);
            }
        }
        self.cleanup(id);
    }

    pub fn on_stream_data_lost(&mut self, id: StreamId, offset: u64, len: u64, is_fin: bool) {
        if let Some(entry) = self.streams.get_mut(&u64::from(id)) {
            if let Some(send) = entry.send.as_mut() {
                send.on_data_lost(offset, len, is_fin);
            }
        }
    }

    pub fn on_reset_acked(&mut self, id: StreamId) {
        if let Some(entry) = self.streams.get_mut(&u64::from(id)) {
            if let Some(send) = entry.send.as_mut() {
                send.on_reset_acked();
            }
        }
        self.cleanup(id);
    }

    pub fn on_reset_lost(&mut self, id: StreamId) {
        if let Some(entry) = self.streams.get_mut(&u64::from(id)) {
            if let Some(send) = entry.send.as_mut() {
                send.on_reset_lost();
            }
        }
    }

    pub fn on_stop_sending_lost(&mut self, id: StreamId) {
        if let Some(entry) = self.streams.get_mut(&u64::from(id)) {
            if let Some(recv) = entry.recv.as_mut() {
                recv.on_stop_sending_lost();
            }
        }
    }

    /// Aborts every stream, e.g. when the connection closes
    pub fn close(&mut self) {
        self.streams.clear();
        self.accept_queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parameters(streams: u32) -> TransportParameters {
        TransportParameters {
            initial_max_data: VarInt::from_u32(1 << 20),
            initial_max_stream_data_bidi_local: VarInt::from_u32(1 << 16),
            initial_max_stream_data_bidi_remote: VarInt::from_u32(1 << 16),
            initial_max_stream_data_uni: VarInt::from_u32(1 << 16),
            initial_max_streams_bidi: VarInt::from_u32(streams),
            initial_max_streams_uni: VarInt::from_u32(streams),
            ..Default::default()
        }
    }

    fn manager(local: endpoint::Type) -> StreamManager {
        let mut manager = StreamManager::new(local, &parameters(16));
        manager.on_peer_parameters(&parameters(16));
        manager
    }

    #[test]
    fn open_allocates_monotonic_ids() {
        let mut manager = manager(endpoint::Type::Client);
        let a = manager.open(StreamType::Bidirectional).unwrap();
        let b = manager.open(StreamType::Bidirectional).unwrap();
        let c = manager.open(StreamType::Unidirectional).unwrap();

        assert_eq!(u64::from(a), 0);
        assert_eq!(u64::from(b), 4);
        assert_eq!(u64::from(c), 2);
    }

    #[test]
    fn peer_stream_limit_enforced() {
        let mut manager = StreamManager::new(endpoint::Type::Client, &parameters(16));
        manager.on_peer_parameters(&parameters(2));

        manager.open(StreamType::Bidirectional).unwrap();
        manager.open(StreamType::Bidirectional).unwrap();
        assert_eq!(
            manager.open(StreamType::Bidirectional),
            Err(OpenError::StreamsExhausted)
        );
    }

    #[test]
    fn implicit_creation_of_lower_ids() {
        let mut manager = manager(endpoint::Type::Server);

        // client opens its 3rd bidi stream (id 8) out of order
        manager
            .on_stream_data(
                StreamId::from_varint(VarInt::from_u8(8)),
                VarInt::ZERO,
                b"x",
                false,
            )
            .unwrap();

        // streams 0, 4 and 8 now exist and are accepted in order
        assert_eq!(u64::from(manager.accept().unwrap()), 0);
        assert_eq!(u64::from(manager.accept().unwrap()), 4);
        assert_eq!(u64::from(manager.accept().unwrap()), 8);
        assert!(manager.accept().is_none());
    }

    #[test]
    fn unopened_local_stream_is_rejected() {
        let mut manager = manager(endpoint::Type::Server);

        // a frame for a server-initiated stream the server never opened
        let error = manager
            .on_stream_data(
                StreamId::from_varint(VarInt::from_u8(1)),
                VarInt::ZERO,
                b"x",
                false,
            )
            .unwrap_err();
        assert_eq!(error.code, transport::Error::STREAM_STATE_ERROR);
    }

    #[test]
    fn stream_limit_violation() {
        let mut manager = StreamManager::new(endpoint::Type::Server, &parameters(1));
        manager.on_peer_parameters(&parameters(16));

        // the client's second bidi stream exceeds our advertised limit of 1
        let error = manager
            .on_stream_data(
                StreamId::from_varint(VarInt::from_u8(4)),
                VarInt::ZERO,
                b"x",
                false,
            )
            .unwrap_err();
        assert_eq!(error.code, transport::Error::STREAM_LIMIT_ERROR);
    }

    #[test]
    fn send_only_stream_rejects_data() {
        let mut manager = manager(endpoint::Type::Client);
        let id = manager.open(StreamType::Unidirectional).unwrap();

        let error = manager
            .on_stream_data(id, VarInt::ZERO, b"x", false)
            .unwrap_err();
        assert_eq!(error.code, transport::Error::STREAM_STATE_ERROR);
    }

    #[test]
    fn echo_round_trip() {
        let mut client = manager(endpoint::Type::Client);
        let mut server = manager(endpoint::Type::Server);

        let id = client.open(StreamType::Bidirectional).unwrap();
        client.write(id, b"ping").unwrap();
        client.finish(id).unwrap();

        let (chunk, _) = client.next_chunk(1024, 1024).unwrap();
        server
            .on_stream_data(
                chunk.stream_id,
                VarInt::new(chunk.offset).unwrap(),
                &chunk.data,
                chunk.is_fin,
            )
            .unwrap();

        let accepted = server.accept().unwrap();
        let mut out = [0u8; 8];
        let (len, fin) = server.read(accepted, &mut out).unwrap();
        assert_eq!(&out[..len], b"ping");
        assert!(fin);
    }
}
