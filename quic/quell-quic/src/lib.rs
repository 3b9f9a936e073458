// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! quell-quic: an implementation of the IETF QUIC protocol
//!
//! The public surface is small: a [`Client`] resolves an endpoint and
//! yields a [`Connection`]; a [`Server`] binds a UDP socket and accepts
//! [`Connection`]s; connections open and accept [`stream`]s. The protocol
//! core lives in `quell-quic-transport` and is driven here by a
//! per-connection tokio task.
//!
//! ```ignore
//! let client = Client::new(tls_provider, Limits::default());
//! let connection = client.connect(server_address, "example.com").await?;
//! let mut stream = connection.open_bidirectional_stream().await?;
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod provider;
pub mod server;
pub mod stream;

mod driver;
mod rand;

pub use client::Client;
pub use config::Limits;
pub use connection::Connection;
pub use quell_quic_core::application;
pub use quell_quic_transport::connection::ConnectionError;
pub use server::Server;
pub use stream::{BidirectionalStream, ReceiveStream, SendStream, StreamError};
