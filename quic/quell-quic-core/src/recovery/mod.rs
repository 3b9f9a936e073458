// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Loss recovery and congestion control primitives

pub mod congestion_controller;
pub mod pacing;
pub mod rtt_estimator;
pub mod sent_packets;

pub use congestion_controller::NewReno;
pub use pacing::Pacer;
pub use rtt_estimator::RttEstimator;
pub use sent_packets::{SentPacketInfo, SentPackets};

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.1
//# The RECOMMENDED initial value for the packet reordering threshold
//# (kPacketThreshold) is 3, based on best practices for TCP loss
//# detection [RFC5681] [RFC6675].
pub const K_PACKET_THRESHOLD: u64 = 3;

/// Limits the number of probe packets sent on PTO expiration
pub const MAX_PTO_PROBES: usize = 2;
