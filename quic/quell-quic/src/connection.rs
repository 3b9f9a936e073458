// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    driver::Shared,
    stream::{AcceptedStream, BidirectionalStream, ReceiveStream, SendStream},
};
use quell_quic_core::{application, stream::StreamType, varint::VarInt};
use quell_quic_transport::connection::ConnectionError;
use std::sync::Arc;

/// An open QUIC connection
///
/// Cloning the handle is cheap; the connection closes with
/// `APPLICATION_ERROR` when the last handle is dropped without an explicit
/// [`close`](Self::close).
#[derive(Clone)]
pub struct Connection {
    pub(crate) shared: Arc<Shared>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    /// Waits for the handshake to complete, or surfaces the error that
    /// prevented it
    pub(crate) async fn wait_ready(&self) -> Result<(), ConnectionError> {
        loop {
            let notified = self.shared.app_notify.notified();
            {
                let transport = self.shared.lock();
                if let Some(error) = transport.error() {
                    return Err(error.clone());
                }
                if transport.is_handshake_complete() {
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Opens a bidirectional stream, waiting for stream credit if the
    /// peer's limit is currently exhausted
    pub async fn open_bidirectional_stream(
        &self,
    ) -> Result<BidirectionalStream, ConnectionError> {
        let id = self.open(StreamType::Bidirectional).await?;
        Ok(BidirectionalStream {
            send: SendStream::new(self.shared.clone(), id),
            receive: ReceiveStream::new(self.shared.clone(), id),
        })
    }

    /// Opens a unidirectional (send-only) stream
    pub async fn open_send_stream(&self) -> Result<SendStream, ConnectionError> {
        let id = self.open(StreamType::Unidirectional).await?;
        Ok(SendStream::new(self.shared.clone(), id))
    }

    async fn open(
        &self,
        stream_type: StreamType,
    ) -> Result<quell_quic_core::stream::StreamId, ConnectionError> {
        loop {
            let notified = self.shared.app_notify.notified();
            {
                let mut transport = self.shared.lock();
                if let Some(error) = transport.error() {
                    return Err(error.clone());
                }
                if let Some(id) = transport.try_open_stream(stream_type) {
                    self.shared.driver_notify.notify_one();
                    return Ok(id);
                }
            }
            notified.await;
        }
    }

    /// Accepts the next stream the peer opens
    pub async fn accept(&self) -> Result<AcceptedStream, ConnectionError> {
        loop {
            let notified = self.shared.app_notify.notified();
            {
                let mut transport = self.shared.lock();
                if let Some(id) = transport.accept_stream() {
                    let receive = ReceiveStream::new(self.shared.clone(), id);
                    return Ok(if id.stream_type().is_bidirectional() {
                        AcceptedStream::Bidirectional(BidirectionalStream {
                            send: SendStream::new(self.shared.clone(), id),
                            receive,
                        })
                    } else {
                        AcceptedStream::Receive(receive)
                    });
                }
                if let Some(error) = transport.error() {
                    return Err(error.clone());
                }
            }
            notified.await;
        }
    }

    /// Sends an unreliable datagram, if the peer negotiated support
    pub fn send_datagram(&self, data: Vec<u8>) -> Result<(), ConnectionError> {
        let mut transport = self.shared.lock();
        transport.send_datagram(data)?;
        self.shared.driver_notify.notify_one();
        Ok(())
    }

    /// Receives the next unreliable datagram
    pub async fn receive_datagram(&self) -> Result<Vec<u8>, ConnectionError> {
        loop {
            let notified = self.shared.app_notify.notified();
            {
                let mut transport = self.shared.lock();
                if let Some(datagram) = transport.recv_datagram() {
                    return Ok(datagram);
                }
                if let Some(error) = transport.error() {
                    return Err(error.clone());
                }
            }
            notified.await;
        }
    }

    /// Tokens the server provided for future connections
    pub fn take_new_token(&self) -> Option<Vec<u8>> {
        self.shared.lock().take_new_token()
    }

    /// The negotiated application protocol, once the handshake completes
    pub fn application_protocol(&self) -> Option<Vec<u8>> {
        self.shared
            .lock()
            .application_protocol()
            .map(|protocol| protocol.to_vec())
    }

    /// The peer's address on the current path
    pub fn remote_address(&self) -> std::net::SocketAddr {
        self.shared.lock().remote_address()
    }

    /// Closes the connection with an application error code and reason
    pub fn close(&self, error_code: u64, reason: &'static str) {
        let code = application::Error::new(VarInt::new(error_code).unwrap_or(VarInt::MAX));
        let mut transport = self.shared.lock();
        let now = self.shared.clock.now();
        transport.close(code, reason, now);
        drop(transport);
        self.shared.driver_notify.notify_one();
    }

    /// The error that terminated the connection, if any
    pub fn error(&self) -> Option<ConnectionError> {
        self.shared.lock().error().cloned()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // only the last application handle triggers the implicit close;
        // the driver task holds one reference as well
        if Arc::strong_count(&self.shared) <= 2 {
            let mut transport = self.shared.lock();
            if transport.error().is_none() {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-10.2
                //# an endpoint that wishes to communicate a fatal
                //# application error MUST use a CONNECTION_CLOSE frame with
                //# an application error code
                let now = self.shared.clock.now();
                transport.close(
                    application::Error::new(quell_quic_core::transport::Error::APPLICATION_ERROR),
                    "connection handle dropped",
                    now,
                );
            }
            drop(transport);
            self.shared.driver_notify.notify_one();
        }
    }
}
