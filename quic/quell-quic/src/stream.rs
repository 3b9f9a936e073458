// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::driver::Shared;
use quell_quic_core::{application, stream::StreamId, varint::VarInt};
use quell_quic_transport::{
    connection::ConnectionError,
    stream::{RecvError, SendError},
};
use std::sync::Arc;

/// Errors surfaced on stream operations
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamError {
    /// The peer reset the stream with the given application error code
    StreamReset(u64),
    /// The stream was finished and no longer accepts writes
    SendClosed,
    /// The connection terminated
    ConnectionClosed(ConnectionError),
}

impl core::fmt::Display for StreamError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::StreamReset(code) => write!(f, "stream reset by peer with code {code}"),
            Self::SendClosed => write!(f, "stream closed for sending"),
            Self::ConnectionClosed(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for StreamError {}

/// A stream accepted from the peer
pub enum AcceptedStream {
    Bidirectional(BidirectionalStream),
    Receive(ReceiveStream),
}

/// The sending half of a stream
pub struct SendStream {
    shared: Arc<Shared>,
    id: StreamId,
}

impl SendStream {
    pub(crate) fn new(shared: Arc<Shared>, id: StreamId) -> Self {
        Self { shared, id }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id.into()
    }

    /// Writes the entire buffer, waiting for flow-control credit as
    /// needed
    pub async fn write(&mut self, mut data: &[u8]) -> Result<(), StreamError> {
        while !data.is_empty() {
            let notified = self.shared.app_notify.notified();
            {
                let mut transport = self.shared.lock();
                match transport.stream_write(self.id, data) {
                    Ok(written) => {
                        data = &data[written..];
                        drop(transport);
                        self.shared.driver_notify.notify_one();
                        continue;
                    }
                    Err(SendError::WouldBlock) => {
                        if let Some(error) = transport.error() {
                            return Err(StreamError::ConnectionClosed(error.clone()));
                        }
                        // fall through and wait for a window update
                    }
                    Err(SendError::FinishedStream) => return Err(StreamError::SendClosed),
                    Err(SendError::StreamReset(code)) => {
                        return Err(StreamError::StreamReset(code.as_varint().as_u64()))
                    }
                }
            }
            notified.await;
        }
        Ok(())
    }

    /// Marks the end of the stream
    pub fn finish(&mut self) -> Result<(), StreamError> {
        let mut transport = self.shared.lock();
        let result = transport.stream_finish(self.id);
        drop(transport);
        self.shared.driver_notify.notify_one();
        match result {
            Ok(()) => Ok(()),
            Err(SendError::StreamReset(code)) => {
                Err(StreamError::StreamReset(code.as_varint().as_u64()))
            }
            Err(_) => Err(StreamError::SendClosed),
        }
    }

    /// Abandons the stream with an application error code
    pub fn reset(&mut self, error_code: u64) {
        let code = application::Error::new(VarInt::new(error_code).unwrap_or(VarInt::MAX));
        let mut transport = self.shared.lock();
        let _ = transport.stream_reset(self.id, code);
        drop(transport);
        self.shared.driver_notify.notify_one();
    }
}

/// The receiving half of a stream
pub struct ReceiveStream {
    shared: Arc<Shared>,
    id: StreamId,
}

impl ReceiveStream {
    pub(crate) fn new(shared: Arc<Shared>, id: StreamId) -> Self {
        Self { shared, id }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id.into()
    }

    /// Reads the next bytes into `buf`.
    ///
    /// Returns `None` once the stream finished normally.
    pub async fn receive(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StreamError> {
        loop {
            let notified = self.shared.app_notify.notified();
            {
                let mut transport = self.shared.lock();
                match transport.stream_read(self.id, buf) {
                    Ok((0, true)) => return Ok(None),
                    Ok((len, _)) => {
                        drop(transport);
                        self.shared.driver_notify.notify_one();
                        return Ok(Some(len));
                    }
                    Err(RecvError::WouldBlock) => {
                        if let Some(error) = transport.error() {
                            return Err(StreamError::ConnectionClosed(error.clone()));
                        }
                    }
                    Err(RecvError::StreamReset(code)) => {
                        return Err(StreamError::StreamReset(code.as_varint().as_u64()))
                    }
                }
            }
            notified.await;
        }
    }

    /// Collects the entire stream into a vector
    pub async fn receive_to_end(&mut self) -> Result<Vec<u8>, StreamError> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        while let Some(len) = self.receive(&mut buf).await? {
            out.extend_from_slice(&buf[..len]);
        }
        Ok(out)
    }

    /// Asks the peer to stop sending on this stream
    pub fn stop_sending(&mut self, error_code: u64) {
        let code = application::Error::new(VarInt::new(error_code).unwrap_or(VarInt::MAX));
        let mut transport = self.shared.lock();
        transport.stream_stop_sending(self.id, code);
        drop(transport);
        self.shared.driver_notify.notify_one();
    }
}

/// Both halves of a bidirectional stream
pub struct BidirectionalStream {
    pub(crate) send: SendStream,
    pub(crate) receive: ReceiveStream,
}

impl BidirectionalStream {
    #[inline]
    pub fn id(&self) -> u64 {
        self.send.id()
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<(), StreamError> {
        self.send.write(data).await
    }

    pub fn finish(&mut self) -> Result<(), StreamError> {
        self.send.finish()
    }

    pub async fn receive(&mut self, buf: &mut [u8]) -> Result<Option<usize>, StreamError> {
        self.receive.receive(buf).await
    }

    pub async fn receive_to_end(&mut self) -> Result<Vec<u8>, StreamError> {
        self.receive.receive_to_end().await
    }

    /// Splits the stream into its send and receive halves
    pub fn split(self) -> (ReceiveStream, SendStream) {
        (self.receive, self.send)
    }
}
