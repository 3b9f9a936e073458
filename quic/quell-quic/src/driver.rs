// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The per-connection driver task
//!
//! Each connection is a single-threaded cooperative actor: one task owns
//! the suspension points (inbound datagrams, the earliest timer, and
//! application wakeups) and mutates the transport state machine.

use quell_quic_core::{
    connection::ConnectionId,
    inet::ExplicitCongestionNotification,
    time::{Duration, Timestamp},
};
use quell_quic_transport::connection::Connection as Transport;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};
use tokio::{
    net::UdpSocket,
    sync::{mpsc, Notify},
};
use tracing::{debug, trace};

/// Maps transport timestamps onto the tokio clock
#[derive(Clone, Copy, Debug)]
pub(crate) struct Clock {
    epoch: tokio::time::Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            epoch: tokio::time::Instant::now(),
        }
    }

    pub fn now(&self) -> Timestamp {
        Timestamp::from_duration(self.epoch.elapsed())
    }

    pub fn instant(&self, timestamp: Timestamp) -> tokio::time::Instant {
        self.epoch + timestamp.as_duration()
    }
}

/// State shared between the driver task and the application handles
pub(crate) struct Shared {
    pub transport: Mutex<Transport>,
    /// Wakes application futures after the driver made progress
    pub app_notify: Notify,
    /// Wakes the driver after the application queued work
    pub driver_notify: Notify,
    pub clock: Clock,
}

impl Shared {
    pub fn new(transport: Transport, clock: Clock) -> Arc<Self> {
        Arc::new(Self {
            transport: Mutex::new(transport),
            app_notify: Notify::new(),
            driver_notify: Notify::new(),
            clock,
        })
    }

    pub fn lock(&self) -> std::sync::MutexGuard<'_, Transport> {
        self.transport.lock().expect("transport mutex poisoned")
    }
}

/// Where this connection's datagrams come from
pub(crate) enum Inbound {
    /// The connection owns the socket (clients)
    Socket,
    /// A listener dispatches datagrams by connection id (servers)
    Channel(mpsc::Receiver<(Vec<u8>, SocketAddr)>),
}

/// A routing table change sent to the listener: `sender` is `Some` to
/// insert a connection id route and `None` to remove it
pub(crate) struct RouteUpdate {
    pub id: ConnectionId,
    pub sender: Option<mpsc::Sender<(Vec<u8>, SocketAddr)>>,
}

/// The connection's side of the listener's routing table
pub(crate) struct RouteRegistration {
    pub updates: mpsc::UnboundedSender<RouteUpdate>,
    pub datagrams: mpsc::Sender<(Vec<u8>, SocketAddr)>,
}

pub(crate) async fn drive(
    shared: Arc<Shared>,
    socket: Arc<UdpSocket>,
    mut inbound: Inbound,
    routes: Option<RouteRegistration>,
) {
    let clock = shared.clock;
    let mut recv_buf = [0u8; 2048];
    let mut registered_cids = 0usize;

    loop {
        // flush everything the transport wants to send
        let mut outgoing: Vec<(Vec<u8>, SocketAddr)> = Vec::new();
        let (next_timeout, closed) = {
            let mut transport = shared.lock();
            let now = clock.now();
            let mut buf = [0u8; 2048];
            while let Some((len, addr)) = transport.transmit(&mut buf, now) {
                outgoing.push((buf[..len].to_vec(), addr));
            }

            // keep the listener's routing table in sync with the ids we
            // have issued
            if let Some(routes) = &routes {
                let ids = transport.local_connection_ids();
                if ids.len() != registered_cids {
                    for id in ids.iter().skip(registered_cids) {
                        let _ = routes.updates.send(RouteUpdate {
                            id: *id,
                            sender: Some(routes.datagrams.clone()),
                        });
                    }
                    registered_cids = ids.len();
                }
            }

            (transport.next_timeout(), transport.is_closed())
        };

        for (datagram, addr) in outgoing {
            if let Err(error) = socket.send_to(&datagram, addr).await {
                debug!(%error, "udp send failed");
            }
        }

        shared.app_notify.notify_waiters();

        if closed {
            debug!("connection driver exiting");
            if let Some(routes) = &routes {
                let transport = shared.lock();
                for id in transport.local_connection_ids() {
                    let _ = routes.updates.send(RouteUpdate { id, sender: None });
                }
            }
            return;
        }

        let sleep = async {
            match next_timeout {
                Some(deadline) => tokio::time::sleep_until(clock.instant(deadline)).await,
                // no timer armed; wait for external events
                None => tokio::time::sleep(Duration::from_secs(3600)).await,
            }
        };

        match &mut inbound {
            Inbound::Socket => {
                tokio::select! {
                    received = socket.recv_from(&mut recv_buf) => {
                        if let Ok((len, addr)) = received {
                            trace!(len, "datagram received");
                            let mut transport = shared.lock();
                            transport.on_datagram(
                                &mut recv_buf[..len],
                                addr,
                                ExplicitCongestionNotification::NotEct,
                                clock.now(),
                            );
                        }
                    }
                    _ = sleep => {
                        let mut transport = shared.lock();
                        transport.on_timeout(clock.now());
                    }
                    _ = shared.driver_notify.notified() => {}
                }
            }
            Inbound::Channel(receiver) => {
                tokio::select! {
                    received = receiver.recv() => {
                        match received {
                            Some((mut datagram, addr)) => {
                                trace!(len = datagram.len(), "datagram received");
                                let mut transport = shared.lock();
                                transport.on_datagram(
                                    &mut datagram,
                                    addr,
                                    ExplicitCongestionNotification::NotEct,
                                    clock.now(),
                                );
                            }
                            // the listener went away; nothing more will
                            // arrive
                            None => {
                                let mut transport = shared.lock();
                                transport.on_timeout(clock.now());
                            }
                        }
                    }
                    _ = sleep => {
                        let mut transport = shared.lock();
                        transport.on_timeout(clock.now());
                    }
                    _ = shared.driver_notify.notified() => {}
                }
            }
        }
    }
}
