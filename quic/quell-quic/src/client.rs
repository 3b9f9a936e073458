// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    config::Limits,
    connection::Connection,
    driver::{self, Clock, Inbound, Shared},
    provider,
};
use quell_quic_core::{connection::ConnectionId, endpoint};
use quell_quic_transport::connection::{Config, Connection as Transport, ConnectionError};
use std::{io, net::SocketAddr, sync::Arc};
use tokio::net::UdpSocket;
use tracing::debug;

/// Connects to QUIC servers
pub struct Client {
    tls: Arc<dyn provider::Provider>,
    limits: Limits,
}

/// Errors produced while establishing a connection
#[derive(Debug)]
pub enum ConnectError {
    Io(io::Error),
    Connection(ConnectionError),
    /// The handshake did not finish within `connect_timeout`
    Timeout,
}

impl core::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Io(error) => write!(f, "io error: {error}"),
            Self::Connection(error) => write!(f, "{error}"),
            Self::Timeout => write!(f, "connect timed out"),
        }
    }
}

impl std::error::Error for ConnectError {}

impl From<io::Error> for ConnectError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<ConnectionError> for ConnectError {
    fn from(error: ConnectionError) -> Self {
        Self::Connection(error)
    }
}

impl Client {
    pub fn new(tls: Arc<dyn provider::Provider>, limits: Limits) -> Self {
        Self { tls, limits }
    }

    /// Opens a connection to `remote_address`, using `server_name` for SNI
    /// and certificate validation
    pub async fn connect(
        &self,
        remote_address: SocketAddr,
        server_name: &str,
    ) -> Result<Connection, ConnectError> {
        let bind_address: SocketAddr = if remote_address.is_ipv4() {
            "0.0.0.0:0".parse().expect("a valid wildcard address")
        } else {
            "[::]:0".parse().expect("a valid wildcard address")
        };
        let socket = Arc::new(UdpSocket::bind(bind_address).await?);
        socket.connect(remote_address).await?;

        let mut random = crate::rand::Generator::new();

        //= https://www.rfc-editor.org/rfc/rfc9000#section-7.2
        //# When an Initial packet is sent by a client that has not previously
        //# received an Initial or Retry packet from the server, the client
        //# populates the Destination Connection ID field with an unpredictable
        //# value.  This Destination Connection ID MUST be at least 8 bytes in
        //# length.
        let initial_dcid = ConnectionId::generate(&mut random, 8);
        let local_cid = ConnectionId::generate(&mut random, 8);

        let clock = Clock::new();
        let session = self
            .tls
            .new_session(endpoint::Type::Client, Some(server_name));

        let transport = Transport::new(
            Config {
                endpoint_type: endpoint::Type::Client,
                limits: self.limits.clone().into_transport(),
                local_connection_id: local_cid,
                peer_connection_id: initial_dcid,
                initial_destination_connection_id: initial_dcid,
                remote_address,
                token: Vec::new(),
            },
            session,
            Box::new(random),
            clock.now(),
        )
        .map_err(|_| {
            ConnectError::Io(io::Error::new(io::ErrorKind::Other, "transport setup failed"))
        })?;

        let shared = Shared::new(transport, clock);
        let connection = Connection {
            shared: shared.clone(),
        };

        debug!(%remote_address, "starting connection");
        tokio::spawn(driver::drive(shared, socket, Inbound::Socket, None));

        match tokio::time::timeout(self.limits.connect_timeout, connection.wait_ready()).await {
            Ok(Ok(())) => Ok(connection),
            Ok(Err(error)) => Err(error.into()),
            Err(_) => {
                connection.close(0, "connect timeout");
                Err(ConnectError::Timeout)
            }
        }
    }
}
