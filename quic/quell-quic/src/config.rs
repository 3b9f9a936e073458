// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::time::Duration;
use quell_quic_core::varint::VarInt;

pub use quell_quic_transport::connection::Limits as TransportLimits;

/// User-facing connection limits
///
/// Defaults are suitable for most internet applications; data windows can
/// be tuned for the expected bandwidth-delay product.
#[derive(Clone, Debug)]
pub struct Limits {
    pub initial_max_data: u64,
    pub initial_max_stream_data_bidi_local: u64,
    pub initial_max_stream_data_bidi_remote: u64,
    pub initial_max_stream_data_uni: u64,
    pub initial_max_streams_bidi: u64,
    pub initial_max_streams_uni: u64,
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_datagram_size: u16,
    pub enable_ecn: bool,
    pub active_connection_id_limit: u64,
    pub disable_active_migration: bool,
    pub keep_alive_interval: Option<Duration>,
    /// Non-zero enables DATAGRAM frame support
    pub max_datagram_frame_size: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            initial_max_data: 10 * 1024 * 1024,
            initial_max_stream_data_bidi_local: 1024 * 1024,
            initial_max_stream_data_bidi_remote: 1024 * 1024,
            initial_max_stream_data_uni: 1024 * 1024,
            initial_max_streams_bidi: 100,
            initial_max_streams_uni: 100,
            idle_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_datagram_size: 1452,
            enable_ecn: false,
            active_connection_id_limit: 4,
            disable_active_migration: false,
            keep_alive_interval: None,
            max_datagram_frame_size: 0,
        }
    }
}

impl Limits {
    pub(crate) fn into_transport(self) -> TransportLimits {
        let varint = |value: u64| VarInt::new(value).unwrap_or(VarInt::MAX);
        TransportLimits {
            initial_max_data: varint(self.initial_max_data),
            initial_max_stream_data_bidi_local: varint(self.initial_max_stream_data_bidi_local),
            initial_max_stream_data_bidi_remote: varint(self.initial_max_stream_data_bidi_remote),
            initial_max_stream_data_uni: varint(self.initial_max_stream_data_uni),
            initial_max_streams_bidi: varint(self.initial_max_streams_bidi),
            initial_max_streams_uni: varint(self.initial_max_streams_uni),
            max_idle_timeout: self.idle_timeout,
            max_udp_payload_size: self.max_datagram_size.max(1200),
            max_ack_delay: Duration::from_millis(25),
            active_connection_id_limit: varint(self.active_connection_id_limit.max(2)),
            max_datagram_frame_size: varint(self.max_datagram_frame_size),
            keep_alive_interval: self.keep_alive_interval,
            disable_active_migration: self.disable_active_migration,
            enable_ecn: self.enable_ecn,
        }
    }
}
