// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{buffer::ReceiveBuffer, flow::RxWindow};
use quell_quic_core::{
    application,
    stream::{RecvState, StreamId},
    transport, transport_error,
    varint::VarInt,
};

/// Errors surfaced to the application when reading
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecvError {
    /// The peer reset the stream with the given error code
    StreamReset(application::Error),
    /// No data is available yet; retry once more arrives
    WouldBlock,
}

/// The receiving half of a stream
///
//= https://www.rfc-editor.org/rfc/rfc9000#section-3.2
//# The receiving part of a stream initiated by a peer (types 1 and 3 for
//# a client, or 0 and 2 for a server) is created when the first STREAM,
//# STREAM_DATA_BLOCKED, or RESET_STREAM frame is received for that
//# stream.
#[derive(Debug)]
pub struct ReceiveStream {
    id: StreamId,
    state: RecvState,
    buffer: ReceiveBuffer,
    /// Our flow-control grant to the peer
    pub(crate) flow: RxWindow,
    /// The stream length, once a FIN or RESET_STREAM fixes it
    final_size: Option<u64>,
    /// The error code from a peer RESET_STREAM
    reset_error: Option<application::Error>,
    /// Set when the application asked the peer to stop; carries the code
    /// until the STOP_SENDING frame is transmitted
    stop_sending_pending: Option<application::Error>,
    stop_sending_sent: Option<application::Error>,
}

impl ReceiveStream {
    pub fn new(id: StreamId, max_stream_data: VarInt) -> Self {
        Self {
            id,
            state: RecvState::Recv,
            buffer: ReceiveBuffer::new(),
            flow: RxWindow::new(max_stream_data),
            final_size: None,
            reset_error: None,
            stop_sending_pending: None,
            stop_sending_sent: None,
        }
    }

    #[inline]
    pub fn id(&self) -> StreamId {
        self.id
    }

    #[inline]
    pub fn state(&self) -> RecvState {
        self.state
    }

    /// Handles an inbound STREAM frame. Returns the number of
    /// previously-unseen bytes, which count toward the connection window.
    pub fn on_data(
        &mut self,
        offset: VarInt,
        data: &[u8],
        is_fin: bool,
    ) -> Result<u64, transport::Error> {
        let end = offset
            .checked_add_usize(data.len())
            .ok_or_else(|| transport_error!(FRAME_ENCODING_ERROR, "stream offset overflow"))?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-4.1
        //# A receiver MUST close the connection with an error of type
        //# FLOW_CONTROL_ERROR if the sender violates the advertised
        //# connection or stream data limits
        self.flow.on_data_received(end)?;

        if let Some(final_size) = self.final_size {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-4.5
            //# Once a final size for a stream is known, it cannot change.  If a
            //# RESET_STREAM or STREAM frame is received indicating a change in
            //# the final size for the stream, an endpoint SHOULD respond with
            //# an error of type FINAL_SIZE_ERROR
            if end.as_u64() > final_size || (is_fin && end.as_u64() != final_size) {
                return Err(transport_error!(
                    FINAL_SIZE_ERROR,
                    "stream data inconsistent with final size"
                ));
            }
        }

        if is_fin {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-4.5
            //# A receiver SHOULD treat receipt of data at or beyond the final
            //# size as an error of type FINAL_SIZE_ERROR
            if self.buffer.highest_received() > end.as_u64() {
                return Err(transport_error!(
                    FINAL_SIZE_ERROR,
                    "final size below received data"
                ));
            }
            self.final_size = Some(end.as_u64());
            if self.state == RecvState::Recv {
                self.state = RecvState::SizeKnown;
            }
        }

        if self.state.is_reset() {
            // data arriving after a reset is dropped; allowance was already
            // reclaimed from the final size
            return Ok(0);
        }

        let before = self.buffer.highest_received();
        self.buffer.insert(offset.as_u64(), data);
        let newly_received = self.buffer.highest_received().saturating_sub(before);

        self.update_data_recvd();

        Ok(newly_received)
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-3.2
    //# Receiving a RESET_STREAM frame in the "Recv" or "Size Known" state
    //# causes the stream to enter the "Reset Recvd" state.
    /// Handles a RESET_STREAM frame.
    ///
    /// Returns `(newly_received, unread)`: credits consumed by
    /// previously-unseen offsets, and the allowance up to the final size
    /// that the application will never read and the connection window can
    /// reclaim.
    pub fn on_reset(
        &mut self,
        error: application::Error,
        final_size: VarInt,
    ) -> Result<(u64, u64), transport::Error> {
        if let Some(known) = self.final_size {
            if known != final_size.as_u64() {
                return Err(transport_error!(
                    FINAL_SIZE_ERROR,
                    "reset final size conflicts with known size"
                ));
            }
        }
        if final_size.as_u64() < self.buffer.highest_received() {
            return Err(transport_error!(
                FINAL_SIZE_ERROR,
                "reset final size below received data"
            ));
        }

        self.flow.on_data_received(final_size)?;
        let newly_received = final_size
            .as_u64()
            .saturating_sub(self.buffer.highest_received());
        let unread = final_size.as_u64().saturating_sub(self.buffer.read_offset());

        self.final_size = Some(final_size.as_u64());

        if !self.state.is_terminal() && !self.state.is_reset() {
            self.state = RecvState::ResetRecvd;
            self.reset_error = Some(error);
            self.buffer.clear();
        }

        Ok((newly_received, unread))
    }

    /// Copies readable bytes into `out`.
    ///
    /// Returns the bytes read and whether the end of the stream was
    /// reached.
    pub fn read(&mut self, out: &mut [u8]) -> Result<(usize, bool), RecvError> {
        if let Some(error) = self.reset_error {
            if self.state == RecvState::ResetRecvd {
                self.state = RecvState::ResetRead;
            }
            return Err(RecvError::StreamReset(error));
        }

        let len = self.buffer.read(out);
        if len > 0 {
            self.flow.on_data_consumed(len);
        }

        let finished = self.final_size == Some(self.buffer.read_offset());
        if finished {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-3.2
            //# Once stream data has been delivered to the application, the
            //# stream enters the "Data Read" state
            if self.state == RecvState::DataRecvd {
                self.state = RecvState::DataRead;
            }
            return Ok((len, true));
        }

        if len == 0 {
            return Err(RecvError::WouldBlock);
        }

        Ok((len, false))
    }

    /// Returns true if a read would make progress
    pub fn is_readable(&self) -> bool {
        self.reset_error.is_some()
            || self.buffer.is_readable()
            || self.final_size == Some(self.buffer.read_offset())
    }

    /// Requests that the peer stop sending on this stream
    //= https://www.rfc-editor.org/rfc/rfc9000#section-3.5
    //# If an application is no longer interested in the data it is
    //# receiving on a stream, it can abort reading the stream and specify
    //# an application error code.
    pub fn stop_sending(&mut self, error: application::Error) {
        if self.state.is_terminal() || self.state.is_reset() {
            return;
        }
        if self.stop_sending_sent.is_none() {
            self.stop_sending_pending = Some(error);
        }
    }

    pub fn take_pending_stop_sending(&mut self) -> Option<application::Error> {
        let error = self.stop_sending_pending.take()?;
        self.stop_sending_sent = Some(error);
        Some(error)
    }

    pub fn on_stop_sending_lost(&mut self) {
        if let Some(error) = self.stop_sending_sent {
            if !self.state.is_reset() {
                self.stop_sending_pending = Some(error);
            }
        }
    }

    /// Returns the MAX_STREAM_DATA value to advertise, if an update is due
    pub fn window_update(&mut self) -> Option<VarInt> {
        if self.state.is_reset() || self.final_size.is_some() {
            // no further credit is useful once the size is fixed
            return None;
        }
        self.flow.window_update()
    }

    /// Re-queues the current MAX_STREAM_DATA advertisement after the
    /// frame carrying it was lost or did not fit in a packet
    pub fn on_window_update_lost(&mut self) {
        self.flow.request_update();
    }

    fn update_data_recvd(&mut self) {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-3.2
        //# When a STREAM frame with a FIN bit is received and all stream data
        //# has been received, all stream data is considered received
        if self.state == RecvState::SizeKnown {
            if let Some(final_size) = self.final_size {
                let contiguous =
                    self.buffer.read_offset() + self.buffer.contiguous_len() as u64;
                if contiguous == final_size {
                    self.state = RecvState::DataRecvd;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(window: u32) -> ReceiveStream {
        ReceiveStream::new(
            StreamId::from_varint(VarInt::from_u8(0)),
            VarInt::from_u32(window),
        )
    }

    #[test]
    fn ordered_receive_and_read() {
        let mut stream = stream(1024);
        stream.on_data(VarInt::ZERO, b"hello ", false).unwrap();
        stream.on_data(VarInt::from_u8(6), b"world", true).unwrap();
        assert_eq!(stream.state(), RecvState::DataRecvd);

        let mut out = [0u8; 16];
        let (len, fin) = stream.read(&mut out).unwrap();
        assert_eq!(&out[..len], b"hello world");
        assert!(fin);
        assert_eq!(stream.state(), RecvState::DataRead);
    }

    #[test]
    fn out_of_order_with_fin() {
        let mut stream = stream(1024);
        stream.on_data(VarInt::from_u8(6), b"world", true).unwrap();
        assert_eq!(stream.state(), RecvState::SizeKnown);

        let mut out = [0u8; 16];
        assert_eq!(stream.read(&mut out), Err(RecvError::WouldBlock));

        stream.on_data(VarInt::ZERO, b"hello ", false).unwrap();
        assert_eq!(stream.state(), RecvState::DataRecvd);
        let (len, fin) = stream.read(&mut out).unwrap();
        assert_eq!(len, 11);
        assert!(fin);
    }

    #[test]
    fn flow_control_violation() {
        let mut stream = stream(10);
        let error = stream
            .on_data(VarInt::from_u8(8), b"abc", false)
            .unwrap_err();
        assert_eq!(error.code, transport::Error::FLOW_CONTROL_ERROR);
    }

    #[test]
    fn final_size_errors() {
        let mut stream = stream(1024);
        stream.on_data(VarInt::ZERO, b"12345", true).unwrap();

        // data beyond the final size
        let error = stream
            .on_data(VarInt::from_u8(5), b"x", false)
            .unwrap_err();
        assert_eq!(error.code, transport::Error::FINAL_SIZE_ERROR);

        // a conflicting reset final size
        let error = stream
            .on_reset(application::Error::UNKNOWN, VarInt::from_u8(9))
            .unwrap_err();
        assert_eq!(error.code, transport::Error::FINAL_SIZE_ERROR);
    }

    #[test]
    fn reset_reports_unread_allowance() {
        let mut stream = stream(1024);
        stream.on_data(VarInt::ZERO, b"abcd", false).unwrap();

        let mut out = [0u8; 2];
        stream.read(&mut out).unwrap();

        // 10 total, 4 seen (2 read), so 6 newly received and 8 unread
        let (newly, unread) = stream
            .on_reset(application::Error::from(1u32), VarInt::from_u8(10))
            .unwrap();
        assert_eq!(newly, 6);
        assert_eq!(unread, 8);
    }

    #[test]
    fn lost_window_update_is_requeued() {
        let mut stream = stream(100);
        stream.on_data(VarInt::ZERO, &[0u8; 60], false).unwrap();

        let mut out = [0u8; 60];
        stream.read(&mut out).unwrap();
        assert_eq!(stream.window_update(), Some(VarInt::from_u32(160)));
        assert!(stream.window_update().is_none());

        stream.on_window_update_lost();
        assert_eq!(stream.window_update(), Some(VarInt::from_u32(160)));
        assert!(stream.window_update().is_none());
    }

    #[test]
    fn reset_aborts_reads() {
        let mut stream = stream(1024);
        stream.on_data(VarInt::ZERO, b"data", false).unwrap();
        stream
            .on_reset(application::Error::from(3u32), VarInt::from_u8(10))
            .unwrap();

        let mut out = [0u8; 4];
        assert_eq!(
            stream.read(&mut out),
            Err(RecvError::StreamReset(application::Error::from(3u32)))
        );
        assert_eq!(stream.state(), RecvState::ResetRead);
    }
}
