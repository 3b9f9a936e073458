// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection orchestration for quell-quic
//!
//! The `Connection` in this crate is a sans-IO state machine: the caller
//! feeds it received datagrams and a clock, asks it to fill outgoing
//! datagrams, and drives its timers. The `quell-quic` crate wraps it in a
//! tokio-based async API.

extern crate alloc;

pub mod buffer;
pub mod cid;
pub mod connection;
pub mod flow;
pub mod handshake;
pub mod path;
pub mod recovery;
pub mod space;
pub mod stream;
pub mod tls;

pub use connection::{Config, Connection, ConnectionError, Limits};
