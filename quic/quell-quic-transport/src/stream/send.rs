// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{flow::TxWindow, stream::range_set::RangeSet};
use alloc::collections::VecDeque;
use quell_quic_core::{
    application,
    stream::{SendState, StreamId},
    varint::VarInt,
};

/// Data returned for one outgoing STREAM frame
#[derive(Debug, PartialEq, Eq)]
pub struct StreamChunk {
    pub stream_id: StreamId,
    pub offset: u64,
    pub data: alloc::vec::Vec<u8>,
    pub is_fin: bool,
}

/// Errors surfaced to the application when writing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendError {
    /// The stream was finished and accepts no further writes
    FinishedStream,
    /// The stream was reset locally or stopped by the peer
    StreamReset(application::Error),
    /// Stream-level flow control credit is exhausted; retry after the peer
    /// extends the window
    WouldBlock,
}

/// The sending half of a stream
///
//= https://www.rfc-editor.org/rfc/rfc9000#section-3.1
//# The sending part of a stream that the endpoint initiates (types 0 and
//# 2 for clients, 1 and 3 for servers) is opened by the application.
#[derive(Debug)]
pub struct SendStream {
    id: StreamId,
    state: SendState,
    /// Buffered bytes that have not been contiguously acknowledged; the
    /// front of the queue is at offset `buffer_offset`
    buffer: VecDeque<u8>,
    /// Stream offset of the first byte in `buffer`
    buffer_offset: u64,
    /// Total number of bytes the application has written
    write_offset: u64,
    /// High-water mark of transmitted offsets; pending offsets below it
    /// are retransmissions
    transmitted: u64,
    /// Offsets that need (re)transmission
    pending: RangeSet,
    /// Offsets the peer has acknowledged
    acked: RangeSet,
    /// Set once the application calls finish
    final_size: Option<u64>,
    /// True while a FIN needs (re)transmission
    fin_pending: bool,
    /// True once a FIN has been acknowledged
    fin_acked: bool,
    /// Peer-granted stream credit
    pub(crate) flow: TxWindow,
    /// Set when a RESET_STREAM frame needs (re)transmission
    reset_pending: Option<application::Error>,
    /// The error the stream was reset with, locally or via peer
    /// STOP_SENDING
    reset_error: Option<application::Error>,
}

impl SendStream {
    pub fn new(id: StreamId, max_stream_data: VarInt) -> Self {
        Self {
            id,
            state: SendState::Ready,
            buffer: VecDeque::new(),
            buffer_offset: 0,
            write_offset: 0,
            transmitted: 0,
            pending: RangeSet::new(),
            acked: RangeSet::new(),
            final_size: None,
            fin_pending: false,
            fin_acked: false,
            flow: TxWindow::new(max_stream_data),
            reset_pending: None,
            reset_error: None,
        }
    }

    #[inline]
    pub fn id(&self) -> StreamId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> SendState {
        self.state
    }

    /// Bytes the stream may accept right now under its own flow limit
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.flow.limit().as_u64().saturating_sub(self.write_offset)
    }

    /// Appends data to the send buffer.
    ///
    /// Returns the number of bytes accepted, bounded by stream flow
    /// control. Connection-level flow control is applied at transmission
    /// time.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, SendError> {
        if let Some(error) = self.reset_error {
            return Err(SendError::StreamReset(error));
        }

        if self.final_size.is_some() {
            return Err(SendError::FinishedStream);
        }

        let accepted = (self.capacity() as usize).min(data.len());
        if accepted == 0 && !data.is_empty() {
            return Err(SendError::WouldBlock);
        }

        self.buffer.extend(&data[..accepted]);
        let start = self.write_offset;
        self.write_offset += accepted as u64;
        self.pending.insert(start..self.write_offset);
        self.state = SendState::Send;

        Ok(accepted)
    }

    /// Marks the end of the stream; no further writes are accepted
    pub fn finish(&mut self) -> Result<(), SendError> {
        if let Some(error) = self.reset_error {
            return Err(SendError::StreamReset(error));
        }
        if self.final_size.is_none() {
            self.final_size = Some(self.write_offset);
            self.fin_pending = true;
            self.state = SendState::Send;
        }
        Ok(())
    }

    /// Aborts the sending part of the stream
    //= https://www.rfc-editor.org/rfc/rfc9000#section-3.1
    //# From any state that is one of "Ready", "Send", or "Data Sent", an
    //# application can signal that it wishes to abandon transmission of
    //# stream data.  [...] The endpoint sends a RESET_STREAM frame
    //# (Section 19.4), which causes the stream state to become "Reset
    //# Sent".
    pub fn reset(&mut self, error: application::Error) {
        if self.state.is_reset() || self.state == SendState::DataRecvd {
            return;
        }
        self.state = SendState::ResetSent;
        self.reset_error = Some(error);
        self.reset_pending = Some(error);
        self.buffer.clear();
        self.pending = RangeSet::new();
        self.fin_pending = false;
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-3.5
    //# An endpoint that receives a STOP_SENDING frame MUST send a
    //# RESET_STREAM frame if the stream is in the "Ready" or "Send" state.
    pub fn on_stop_sending(&mut self, error: application::Error) {
        if self.state.can_send() || self.state == SendState::DataSent {
            self.reset(error);
        }
    }

    /// The final size to carry in a RESET_STREAM frame
    #[inline]
    pub fn reset_final_size(&self) -> VarInt {
        VarInt::new(self.write_offset).unwrap_or(VarInt::MAX)
    }

    /// Takes a pending RESET_STREAM frame for transmission
    pub fn take_pending_reset(&mut self) -> Option<application::Error> {
        self.reset_pending.take()
    }

    /// Re-queues a RESET_STREAM frame after loss
    pub fn on_reset_lost(&mut self) {
        if self.state == SendState::ResetSent {
            self.reset_pending = self.reset_error;
        }
    }

    /// Called when the peer acknowledges a RESET_STREAM frame
    pub fn on_reset_acked(&mut self) {
        if self.state == SendState::ResetSent {
            self.state = SendState::ResetRecvd;
        }
    }

    /// Returns true if the stream has data, a FIN or a reset ready to
    /// transmit
    pub fn is_transmission_pending(&self) -> bool {
        self.reset_pending.is_some()
            || (!self.state.is_reset() && (!self.pending.is_empty() || self.fin_pending))
    }

    /// Produces the next STREAM frame chunk.
    ///
    /// `max_len` bounds the payload size; `connection_credit` bounds how
    /// many previously untransmitted bytes may be included. Returns the
    /// chunk and the number of connection credits consumed
    /// (retransmissions are free).
    pub fn transmit_chunk(
        &mut self,
        max_len: u64,
        connection_credit: u64,
    ) -> Option<(StreamChunk, u64)> {
        if self.state.is_reset() || max_len == 0 {
            return None;
        }

        let range = match self.pending.min() {
            Some(start) if start < self.transmitted => {
                // pure retransmission, free of connection credit; cap the
                // chunk at the high-water mark so accounting stays simple
                let budget = max_len.min(self.transmitted - start);
                self.pending.pop_min(budget)
            }
            Some(_) => {
                // new data consumes connection credit
                let budget = max_len.min(connection_credit);
                if budget == 0 {
                    None
                } else {
                    self.pending.pop_min(budget)
                }
            }
            None => None,
        };

        let Some(range) = range else {
            // a bare FIN still needs a frame once all data is out
            if self.fin_pending && self.pending.is_empty() {
                self.fin_pending = false;
                self.update_state_after_transmit();
                return Some((
                    StreamChunk {
                        stream_id: self.id,
                        offset: self.write_offset,
                        data: alloc::vec::Vec::new(),
                        is_fin: true,
                    },
                    0,
                ));
            }
            return None;
        };

        let new_bytes = range.end.saturating_sub(self.transmitted.max(range.start));
        self.transmitted = self.transmitted.max(range.end);

        let data: alloc::vec::Vec<u8> = {
            let start = (range.start - self.buffer_offset) as usize;
            let len = (range.end - range.start) as usize;
            self.buffer.iter().skip(start).take(len).copied().collect()
        };

        // attach the FIN to the frame carrying the final bytes
        let is_fin = self.fin_pending
            && self.final_size == Some(range.end)
            && self.pending.is_empty();
        if is_fin {
            self.fin_pending = false;
        }

        self.update_state_after_transmit();

        Some((
            StreamChunk {
                stream_id: self.id,
                offset: range.start,
                data,
                is_fin,
            },
            new_bytes,
        ))
    }

    fn update_state_after_transmit(&mut self) {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-3.1
        //# After the application indicates that all stream data has been sent
        //# and a STREAM frame containing the FIN bit is sent, the sending
        //# part of the stream enters the "Data Sent" state.
        if self.state == SendState::Send
            && self.final_size.is_some()
            && self.pending.is_empty()
            && !self.fin_pending
        {
            self.state = SendState::DataSent;
        }
    }

    /// Called when a STREAM frame is acknowledged
    pub fn on_data_acked(&mut self, offset: u64, len: u64, is_fin: bool) {
        if len > 0 {
            self.acked.insert(offset..offset + len);
        }
        if is_fin {
            self.fin_acked = true;
        }

        // release buffered bytes that are contiguously acknowledged and no
        // longer needed for retransmission
        let contiguous = self.acked.end_of_range_containing(self.buffer_offset);
        if let Some(contiguous) = contiguous {
            let release_to = self.pending.min().map_or(contiguous, |p| contiguous.min(p));
            if release_to > self.buffer_offset {
                let drop = ((release_to - self.buffer_offset) as usize).min(self.buffer.len());
                self.buffer.drain(..drop);
                self.buffer_offset = release_to;
            }
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-3.1
        //# Once all stream data has been successfully acknowledged, the
        //# sending part of the stream enters the "Data Recvd" state, which
        //# is a terminal state.
        if self.fin_acked
            && !self.state.is_reset()
            && self
                .final_size
                .map_or(false, |size| size == 0 || self.acked.contains_range(0..size))
        {
            self.state = SendState::DataRecvd;
        }
    }

    /// Called when a STREAM frame is declared lost
    pub fn on_data_lost(&mut self, offset: u64, len: u64, is_fin: bool) {
        if self.state.is_reset() {
            return;
        }
        if len > 0 {
            let range = offset..offset + len;
            if !self.acked.contains_range(range.clone()) {
                self.pending.insert(range);
                self.state = SendState::Send;
            }
        }
        if is_fin && !self.fin_acked {
            self.fin_pending = true;
            self.state = SendState::Send;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> SendStream {
        SendStream::new(StreamId::from_varint(VarInt::from_u8(0)), VarInt::from_u32(1 << 20))
    }

    #[test]
    fn write_transmit_ack_lifecycle() {
        let mut stream = stream();
        assert_eq!(stream.write(b"hello world").unwrap(), 11);
        stream.finish().unwrap();

        let (chunk, credits) = stream.transmit_chunk(1024, 1024).unwrap();
        assert_eq!(chunk.offset, 0);
        assert_eq!(chunk.data, b"hello world");
        assert!(chunk.is_fin);
        assert_eq!(credits, 11);
        assert_eq!(stream.state(), SendState::DataSent);

        stream.on_data_acked(0, 11, true);
        assert_eq!(stream.state(), SendState::DataRecvd);
    }

    #[test]
    fn writes_after_finish_are_rejected() {
        let mut stream = stream();
        stream.write(b"data").unwrap();
        stream.finish().unwrap();
        assert_eq!(stream.write(b"more"), Err(SendError::FinishedStream));
    }

    #[test]
    fn stream_flow_control_bounds_writes() {
        let mut stream =
            SendStream::new(StreamId::from_varint(VarInt::from_u8(0)), VarInt::from_u8(5));
        assert_eq!(stream.write(b"hello world").unwrap(), 5);
        assert_eq!(stream.write(b"more"), Err(SendError::WouldBlock));

        // a MAX_STREAM_DATA update unblocks the stream
        assert!(stream.flow.on_limit_update(VarInt::from_u8(8)));
        assert_eq!(stream.write(b"more").unwrap(), 3);
    }

    #[test]
    fn connection_credit_bounds_new_data_only() {
        let mut stream = stream();
        stream.write(&[0u8; 100]).unwrap();

        // only 40 bytes of connection credit available
        let (chunk, credits) = stream.transmit_chunk(1024, 40).unwrap();
        assert_eq!(chunk.data.len(), 40);
        assert_eq!(credits, 40);

        // a loss makes the range pending again; retransmission needs no
        // credit
        stream.on_data_lost(0, 40, false);
        let (chunk, credits) = stream.transmit_chunk(1024, 0).unwrap();
        assert_eq!(chunk.offset, 0);
        assert_eq!(chunk.data.len(), 40);
        assert_eq!(credits, 0);
    }

    #[test]
    fn reset_stops_transmission() {
        let mut stream = stream();
        stream.write(b"data").unwrap();
        stream.reset(application::Error::from(7u32));

        assert_eq!(stream.state(), SendState::ResetSent);
        assert!(stream.transmit_chunk(1024, 1024).is_none());
        assert_eq!(stream.take_pending_reset(), Some(application::Error::from(7u32)));

        stream.on_reset_acked();
        assert_eq!(stream.state(), SendState::ResetRecvd);
        assert!(matches!(stream.write(b"x"), Err(SendError::StreamReset(_))));
    }
}
