// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Core types for the quell QUIC implementation
//!
//! This crate contains the protocol machinery shared by the transport and
//! crypto crates: wire codecs for variable-length integers, frames and
//! packets, the key-schedule and packet-protection traits, recovery
//! primitives (RTT estimation, congestion control, pacing), stream
//! identifiers and transport parameters.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod ack;
pub mod application;
pub mod connection;
pub mod crypto;
pub mod endpoint;
pub mod frame;
pub mod inet;
pub mod packet;
pub mod random;
pub mod recovery;
pub mod stream;
pub mod time;
#[macro_use]
pub mod transport;
pub mod varint;

/// The QUIC version implemented by this crate
///
//= https://www.rfc-editor.org/rfc/rfc9000#section-15
//# Version 1 of QUIC uses the version value 0x00000001.
pub const QUIC_VERSION: u32 = 0x0000_0001;

/// The smallest maximum datagram size an endpoint is required to support
///
//= https://www.rfc-editor.org/rfc/rfc9000#section-14
//# QUIC MUST NOT be used if the network path cannot support a
//# maximum datagram size of at least 1200 bytes.
pub const MIN_ALLOWED_MAX_UDP_PAYLOAD_SIZE: u16 = 1200;
