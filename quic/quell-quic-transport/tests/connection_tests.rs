// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end scenarios driving a client and server connection through an
//! in-memory network

use quell_quic_core::{
    application,
    connection::ConnectionId,
    endpoint,
    inet::ExplicitCongestionNotification,
    random,
    stream::StreamType,
    time::{Duration, Timestamp},
    varint::VarInt,
};
use quell_quic_transport::{
    connection::{Config, Connection, ConnectionError, Limits},
    tls,
};

const CLIENT_ADDR: std::net::SocketAddr =
    std::net::SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 1111);
const SERVER_ADDR: std::net::SocketAddr =
    std::net::SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST), 4433);

/// A pair of connections wired back to back
struct Pair {
    client: Connection,
    server: Connection,
    now: Timestamp,
    /// Datagram counter per direction, for loss injection
    client_sent: usize,
    /// Client-to-server datagram indices to drop (1-based)
    drop_client_to_server: Vec<usize>,
}

impl Pair {
    fn new(client_limits: Limits, server_limits: Limits) -> Self {
        let client_cid = ConnectionId::try_from_slice(&[0xc1; 8]).unwrap();
        let initial_dcid = ConnectionId::try_from_slice(&[0xd0; 8]).unwrap();
        let now = Timestamp::from_duration(Duration::from_secs(10));

        let client = Connection::new(
            Config {
                endpoint_type: endpoint::Type::Client,
                limits: client_limits,
                local_connection_id: client_cid,
                peer_connection_id: initial_dcid,
                initial_destination_connection_id: initial_dcid,
                remote_address: SERVER_ADDR,
                token: Vec::new(),
            },
            Box::new(tls::testing::Session::new(endpoint::Type::Client)),
            Box::new(random::testing::Generator(7)),
            now,
        )
        .expect("client construction succeeds");

        let server = Connection::new(
            Config {
                endpoint_type: endpoint::Type::Server,
                limits: server_limits,
                local_connection_id: initial_dcid,
                peer_connection_id: client_cid,
                initial_destination_connection_id: initial_dcid,
                remote_address: CLIENT_ADDR,
                token: Vec::new(),
            },
            Box::new(tls::testing::Session::new(endpoint::Type::Server)),
            Box::new(random::testing::Generator(13)),
            now,
        )
        .expect("server construction succeeds");

        Self {
            client,
            server,
            now,
            client_sent: 0,
            drop_client_to_server: Vec::new(),
        }
    }

    fn advance(&mut self, duration: Duration) {
        self.now += duration;
        self.client.on_timeout(self.now);
        self.server.on_timeout(self.now);
    }

    /// Shuttles datagrams both ways until the network is quiet
    fn poll(&mut self) {
        for _ in 0..64 {
            let mut progressed = false;
            let mut buf = [0u8; 1500];

            while let Some((len, _addr)) = self.client.transmit(&mut buf, self.now) {
                progressed = true;
                self.client_sent += 1;
                if self.drop_client_to_server.contains(&self.client_sent) {
                    continue;
                }
                self.server.on_datagram(
                    &mut buf[..len],
                    CLIENT_ADDR,
                    ExplicitCongestionNotification::NotEct,
                    self.now,
                );
            }

            while let Some((len, _addr)) = self.server.transmit(&mut buf, self.now) {
                progressed = true;
                self.client.on_datagram(
                    &mut buf[..len],
                    SERVER_ADDR,
                    ExplicitCongestionNotification::NotEct,
                    self.now,
                );
            }

            // let delayed acks and other short timers fire
            self.advance(Duration::from_millis(30));

            if !progressed {
                return;
            }
        }
    }

    fn handshake(&mut self) {
        self.poll();
        assert!(self.client.is_handshake_complete(), "client handshake");
        assert!(self.server.is_handshake_complete(), "server handshake");
        assert!(self.client.is_handshake_confirmed(), "client confirmation");
    }
}

/// The Initial/Handshake/1-RTT transition completes and 1-RTT packets flow
/// in both directions
#[test]
fn handshake_completes() {
    let mut pair = Pair::new(Limits::default(), Limits::default());
    pair.handshake();

    assert_eq!(pair.client.application_protocol(), Some(&b"quell-test"[..]));
    assert_eq!(pair.server.application_protocol(), Some(&b"quell-test"[..]));
}

/// A bidirectional echo: 1024 bytes with FIN each way
#[test]
fn echo_stream() {
    let mut pair = Pair::new(Limits::default(), Limits::default());
    pair.handshake();

    let payload = [b'A'; 1024];

    let id = pair.client.try_open_stream(StreamType::Bidirectional).unwrap();
    assert_eq!(pair.client.stream_write(id, &payload).unwrap(), 1024);
    pair.client.stream_finish(id).unwrap();
    pair.poll();

    let accepted = pair.server.accept_stream().expect("server accepts the stream");
    let mut received = Vec::new();
    let mut buf = [0u8; 4096];
    let fin = loop {
        match pair.server.stream_read(accepted, &mut buf) {
            Ok((len, fin)) => {
                received.extend_from_slice(&buf[..len]);
                if fin {
                    break true;
                }
            }
            Err(_) => break false,
        }
    };
    assert!(fin, "server observes the fin");
    assert_eq!(received.len(), 1024);
    assert!(received.iter().all(|&byte| byte == b'A'));

    // echo the payload back
    assert_eq!(pair.server.stream_write(accepted, &received).unwrap(), 1024);
    pair.server.stream_finish(accepted).unwrap();
    pair.poll();

    let mut echoed = Vec::new();
    let fin = loop {
        match pair.client.stream_read(id, &mut buf) {
            Ok((len, fin)) => {
                echoed.extend_from_slice(&buf[..len]);
                if fin {
                    break true;
                }
            }
            Err(_) => break false,
        }
    };
    assert!(fin, "client observes the fin");
    assert_eq!(echoed, payload);
}

/// A transfer larger than the connection window progresses only as
/// MAX_DATA updates arrive, and every byte is delivered exactly once in
/// order
#[test]
fn large_transfer_is_flow_controlled() {
    let server_limits = Limits {
        initial_max_data: VarInt::from_u32(65536),
        initial_max_stream_data_bidi_remote: VarInt::from_u32(65536),
        ..Limits::default()
    };
    let mut pair = Pair::new(Limits::default(), server_limits);
    pair.handshake();

    const TOTAL: usize = 200_000;
    let payload: Vec<u8> = (0..TOTAL).map(|index| index as u8).collect();

    let id = pair.client.try_open_stream(StreamType::Bidirectional).unwrap();

    let mut written = 0;
    let mut received = Vec::new();
    let mut accepted = None;
    let mut buf = [0u8; 4096];

    for _ in 0..256 {
        if written < TOTAL {
            if let Ok(len) = pair.client.stream_write(id, &payload[written..]) {
                written += len;
                if written == TOTAL {
                    pair.client.stream_finish(id).unwrap();
                }
            }
        }

        pair.poll();

        if accepted.is_none() {
            accepted = pair.server.accept_stream();
        }
        if let Some(accepted) = accepted {
            while let Ok((len, fin)) = pair.server.stream_read(accepted, &mut buf) {
                received.extend_from_slice(&buf[..len]);
                if fin {
                    assert_eq!(received, payload);
                    return;
                }
            }
        }
    }

    panic!(
        "transfer did not finish: wrote {written}, received {}",
        received.len()
    );
}

/// A dropped datagram mid-transfer is recovered and the receiver still
/// observes every byte in order
#[test]
fn loss_recovery_delivers_all_bytes() {
    let mut pair = Pair::new(Limits::default(), Limits::default());
    pair.handshake();

    // drop the third post-handshake client datagram
    let drop_index = pair.client_sent + 3;
    pair.drop_client_to_server.push(drop_index);

    const TOTAL: usize = 12_000;
    let payload: Vec<u8> = (0..TOTAL).map(|index| (index % 251) as u8).collect();

    let id = pair.client.try_open_stream(StreamType::Bidirectional).unwrap();
    assert_eq!(pair.client.stream_write(id, &payload).unwrap(), TOTAL);
    pair.client.stream_finish(id).unwrap();

    let mut received = Vec::new();
    let mut accepted = None;
    let mut buf = [0u8; 4096];

    for _ in 0..64 {
        pair.poll();
        // give the loss timers room to fire
        pair.advance(Duration::from_millis(120));

        if accepted.is_none() {
            accepted = pair.server.accept_stream();
        }
        if let Some(accepted) = accepted {
            while let Ok((len, fin)) = pair.server.stream_read(accepted, &mut buf) {
                received.extend_from_slice(&buf[..len]);
                if fin {
                    assert_eq!(received, payload);
                    return;
                }
            }
        }
    }

    panic!("lost data was not recovered: received {}", received.len());
}

/// Closing with an application error surfaces the code and reason at the
/// peer, and both sides drain
#[test]
fn close_is_observed_by_peer() {
    let mut pair = Pair::new(Limits::default(), Limits::default());
    pair.handshake();

    pair.client
        .close(application::Error::from(0u32), "bye", pair.now);
    pair.poll();

    match pair.server.error() {
        Some(ConnectionError::Application { code, reason }) => {
            assert_eq!(code.as_u64(), 0);
            assert_eq!(reason.as_slice(), b"bye");
        }
        other => panic!("expected an application close, got {other:?}"),
    }

    // both sides drain after the close interval
    pair.advance(Duration::from_secs(10));
    assert!(pair.client.is_closed());
    assert!(pair.server.is_closed());
}

/// Datagram frames round trip once both sides negotiate support
#[test]
fn datagram_round_trip() {
    let limits = Limits {
        max_datagram_frame_size: VarInt::from_u32(1200),
        ..Limits::default()
    };
    let mut pair = Pair::new(limits.clone(), limits);
    pair.handshake();

    pair.client.send_datagram(b"unreliable".to_vec()).unwrap();
    pair.poll();

    assert_eq!(pair.server.recv_datagram().unwrap(), b"unreliable");
}
