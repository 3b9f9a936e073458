// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end client/server exchange over loopback UDP

use quell_quic::{provider, stream::AcceptedStream, Client, Server};
use std::sync::Arc;

fn test_tls() -> Arc<dyn provider::Provider> {
    Arc::new(provider::testing::Provider)
}

#[tokio::test]
async fn echo_over_loopback() {
    let mut server = Server::bind(
        "127.0.0.1:0".parse().unwrap(),
        test_tls(),
        quell_quic::config::Limits::default(),
    )
    .await
    .expect("server binds");
    let server_address = server.local_address();

    let server_task = tokio::spawn(async move {
        let connection = server.accept().await.expect("a connection arrives");

        match connection.accept().await.expect("a stream arrives") {
            AcceptedStream::Bidirectional(mut stream) => {
                let request = stream.receive_to_end().await.expect("request arrives");
                assert_eq!(request.len(), 1024);
                assert!(request.iter().all(|&byte| byte == b'A'));

                stream.write(&request).await.expect("echo is written");
                stream.finish().expect("echo finishes");
            }
            AcceptedStream::Receive(_) => panic!("expected a bidirectional stream"),
        }

        // hold the connection open until the client is done with it
        let _ = connection.receive_datagram().await;
    });

    let client = Client::new(test_tls(), quell_quic::config::Limits::default());
    let connection = client
        .connect(server_address, "localhost")
        .await
        .expect("client connects");

    assert_eq!(
        connection.application_protocol().as_deref(),
        Some(&b"quell-test"[..])
    );

    let mut stream = connection
        .open_bidirectional_stream()
        .await
        .expect("stream opens");

    stream.write(&[b'A'; 1024]).await.expect("request is written");
    stream.finish().expect("request finishes");

    let response = stream.receive_to_end().await.expect("echo returns");
    assert_eq!(response.len(), 1024);
    assert!(response.iter().all(|&byte| byte == b'A'));

    connection.close(0, "bye");
    server_task.abort();
}

#[tokio::test]
async fn connect_timeout_against_silent_peer() {
    // bind a socket that never answers
    let silent = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let address = silent.local_addr().unwrap();

    let limits = quell_quic::config::Limits {
        connect_timeout: core::time::Duration::from_millis(250),
        ..Default::default()
    };

    let client = Client::new(test_tls(), limits);
    let error = client.connect(address, "localhost").await.unwrap_err();
    assert!(matches!(error, quell_quic::client::ConnectError::Timeout));
}
