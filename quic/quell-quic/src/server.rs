// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The server endpoint: a UDP socket plus a dispatcher routing datagrams
//! to connections by destination connection id

use crate::{
    config::Limits,
    connection::Connection,
    driver::{self, Clock, Inbound, RouteRegistration, RouteUpdate, Shared},
    provider,
};
use quell_quic_core::{connection::ConnectionId, endpoint};
use quell_quic_transport::connection::{Config, Connection as Transport};
use std::{collections::HashMap, io, net::SocketAddr, sync::Arc};
use tokio::{
    net::UdpSocket,
    sync::mpsc,
};
use tracing::{debug, trace, warn};

/// Accepts inbound QUIC connections
pub struct Server {
    local_address: SocketAddr,
    acceptor: mpsc::Receiver<Connection>,
}

impl Server {
    /// Binds a UDP socket and starts the dispatcher
    pub async fn bind(
        bind_address: SocketAddr,
        tls: Arc<dyn provider::Provider>,
        limits: Limits,
    ) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(bind_address).await?);
        let local_address = socket.local_addr()?;
        let (accept_tx, acceptor) = mpsc::channel(64);

        tokio::spawn(dispatch(socket, tls, limits, accept_tx));

        Ok(Self {
            local_address,
            acceptor,
        })
    }

    /// The bound local address
    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    /// Waits for the next inbound connection.
    ///
    /// The returned connection may still be mid-handshake; stream
    /// operations naturally wait for its completion.
    pub async fn accept(&mut self) -> Option<Connection> {
        self.acceptor.recv().await
    }
}

/// One routing table entry per connection id
struct Route {
    datagrams: mpsc::Sender<(Vec<u8>, SocketAddr)>,
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-5.2
//# endpoints use the Destination Connection ID field of an incoming
//# packet to identify the connection to which it belongs
async fn dispatch(
    socket: Arc<UdpSocket>,
    tls: Arc<dyn provider::Provider>,
    limits: Limits,
    accept_tx: mpsc::Sender<Connection>,
) {
    let clock = Clock::new();
    let mut routes: HashMap<Vec<u8>, Route> = HashMap::new();
    let (route_tx, mut route_rx) = mpsc::unbounded_channel::<RouteUpdate>();

    let mut buf = [0u8; 2048];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let Ok((len, remote_address)) = received else {
                    continue;
                };
                let datagram = buf[..len].to_vec();

                match route_of(&datagram, &routes) {
                    Some(key) => {
                        let route = routes.get(&key).expect("route key was just found");
                        if route.datagrams.try_send((datagram, remote_address)).is_err() {
                            trace!("connection receive queue full, dropping datagram");
                        }
                    }
                    None => {
                        if let Some((key, route, connection)) = start_connection(
                            &datagram,
                            remote_address,
                            &socket,
                            &tls,
                            &limits,
                            clock,
                            route_tx.clone(),
                        ) {
                            if route.datagrams.try_send((datagram, remote_address)).is_err() {
                                warn!("new connection queue full");
                            }
                            routes.insert(key, route);
                            if accept_tx.try_send(connection).is_err() {
                                warn!("accept queue full, dropping connection");
                            }
                        }
                    }
                }
            }
            update = route_rx.recv() => {
                let Some(update) = update else {
                    return;
                };
                let key = update.id.as_slice().to_vec();
                match update.sender {
                    Some(datagrams) => {
                        routes.insert(key, Route { datagrams });
                    }
                    None => {
                        routes.remove(&key);
                    }
                }
            }
        }

        // clean up closed connections
        routes.retain(|_, route| !route.datagrams.is_closed());
    }
}

/// Finds the routing key for a datagram, if its destination id is known
fn route_of(datagram: &[u8], routes: &HashMap<Vec<u8>, Route>) -> Option<Vec<u8>> {
    let first = *datagram.first()?;

    if first & 0x80 != 0 {
        // long header: explicit length-prefixed destination id
        let len = *datagram.get(5)? as usize;
        let dcid = datagram.get(6..6 + len)?;
        routes.contains_key(dcid).then(|| dcid.to_vec())
    } else {
        // short header: we issue 8-byte ids
        let dcid = datagram.get(1..1 + 8)?;
        routes.contains_key(dcid).then(|| dcid.to_vec())
    }
}

/// Builds a connection for a datagram with an unknown destination id,
/// which must be a client Initial
#[allow(clippy::too_many_arguments)]
fn start_connection(
    datagram: &[u8],
    remote_address: SocketAddr,
    socket: &Arc<UdpSocket>,
    tls: &Arc<dyn provider::Provider>,
    limits: &Limits,
    clock: Clock,
    route_tx: mpsc::UnboundedSender<RouteUpdate>,
) -> Option<(Vec<u8>, Route, Connection)> {
    //= https://www.rfc-editor.org/rfc/rfc9000#section-14.1
    //# A server MUST discard an Initial packet that is carried in a UDP
    //# datagram with a payload that is smaller than the smallest allowed
    //# maximum datagram size of 1200 bytes.
    if datagram.len() < 1200 {
        trace!("dropping undersized initial datagram");
        return None;
    }

    let first = *datagram.first()?;
    // only long-header initial packets (type 0b00) start connections
    if first & 0xb0 != 0x80 {
        return None;
    }

    let dcid_len = *datagram.get(5)? as usize;
    let dcid = ConnectionId::try_from_slice(datagram.get(6..6 + dcid_len)?).ok()?;
    let scid_len = *datagram.get(6 + dcid_len)? as usize;
    let scid =
        ConnectionId::try_from_slice(datagram.get(7 + dcid_len..7 + dcid_len + scid_len)?).ok()?;

    debug!(%remote_address, "accepting new connection");

    let session = tls.new_session(endpoint::Type::Server, None);
    let random = Box::new(crate::rand::Generator::new());

    // the client's initial destination id becomes this connection's local
    // id, so handshake packets route without a rewrite
    let transport = Transport::new(
        Config {
            endpoint_type: endpoint::Type::Server,
            limits: limits.clone().into_transport(),
            local_connection_id: dcid,
            peer_connection_id: scid,
            initial_destination_connection_id: dcid,
            remote_address,
            token: Vec::new(),
        },
        session,
        random,
        clock.now(),
    )
    .ok()?;

    let shared = Shared::new(transport, clock);
    let connection = Connection {
        shared: shared.clone(),
    };

    let (datagram_tx, datagram_rx) = mpsc::channel(256);

    tokio::spawn(driver::drive(
        shared,
        socket.clone(),
        Inbound::Channel(datagram_rx),
        Some(RouteRegistration {
            updates: route_tx,
            datagrams: datagram_tx.clone(),
        }),
    ));

    Some((
        dcid.as_slice().to_vec(),
        Route {
            datagrams: datagram_tx,
        },
        connection,
    ))
}
