// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::time::{Duration, Timestamp};

//= https://www.rfc-editor.org/rfc/rfc9002#section-7
//# This document specifies a congestion controller for QUIC similar to
//# TCP NewReno [RFC6582].

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.2
//# Endpoints SHOULD use an initial congestion window of ten times the
//# maximum datagram size (max_datagram_size), while limiting the window
//# to the larger of 14,720 bytes or twice the maximum datagram size.
const INITIAL_WINDOW_PACKETS: u32 = 10;
const INITIAL_WINDOW_LIMIT: u32 = 14_720;

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.2
//# The RECOMMENDED value is 2 * max_datagram_size.
const MINIMUM_WINDOW_PACKETS: u32 = 2;

/// A NewReno congestion controller
///
//= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.1
//# QUIC begins every connection in slow start.
#[derive(Clone, Debug)]
pub struct NewReno {
    max_datagram_size: u16,
    congestion_window: u32,
    /// Slow start ends when the window reaches this threshold
    ssthresh: u32,
    bytes_in_flight: u32,
    /// Set while in recovery; acks for packets sent before this time do not
    /// grow the window
    recovery_start_time: Option<Timestamp>,
    /// Byte accumulator for congestion avoidance growth
    bytes_acked: u32,
    /// The time congestion was last signaled by ECN, bounding reductions to
    /// one per round trip
    last_ecn_congestion_event: Option<Timestamp>,
}

impl NewReno {
    pub fn new(max_datagram_size: u16) -> Self {
        Self {
            max_datagram_size,
            congestion_window: Self::initial_window(max_datagram_size),
            //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.1
            //# While a sender is in slow start, the congestion window
            //# increases by the number of bytes acknowledged [...] The sender
            //# starts in slow start [...] with ssthresh set to infinity.
            ssthresh: u32::MAX,
            bytes_in_flight: 0,
            recovery_start_time: None,
            bytes_acked: 0,
            last_ecn_congestion_event: None,
        }
    }

    #[inline]
    fn initial_window(max_datagram_size: u16) -> u32 {
        let mds = max_datagram_size as u32;
        (INITIAL_WINDOW_PACKETS * mds).min(INITIAL_WINDOW_LIMIT.max(MINIMUM_WINDOW_PACKETS * mds))
    }

    #[inline]
    fn minimum_window(&self) -> u32 {
        MINIMUM_WINDOW_PACKETS * self.max_datagram_size as u32
    }

    #[inline]
    pub fn congestion_window(&self) -> u32 {
        self.congestion_window
    }

    #[inline]
    pub fn bytes_in_flight(&self) -> u32 {
        self.bytes_in_flight
    }

    /// Bytes that may still be sent before the window is full
    #[inline]
    pub fn available_window(&self) -> u32 {
        self.congestion_window.saturating_sub(self.bytes_in_flight)
    }

    #[inline]
    pub fn is_congestion_limited(&self) -> bool {
        self.available_window() < self.max_datagram_size as u32
    }

    #[inline]
    pub fn is_slow_start(&self) -> bool {
        self.congestion_window < self.ssthresh
    }

    /// Returns true if an ack or loss for a packet sent at `sent_time`
    /// falls inside the current recovery period
    #[inline]
    pub fn is_recovering(&self, sent_time: Timestamp) -> bool {
        self.in_recovery(sent_time)
    }

    #[inline]
    fn in_recovery(&self, sent_time: Timestamp) -> bool {
        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
        //# A recovery period ends and the sender enters congestion avoidance
        //# when a packet sent during the recovery period is acknowledged.
        self.recovery_start_time
            .map_or(false, |start| sent_time <= start)
    }

    /// Called when a packet counting toward bytes in flight is sent
    #[inline]
    pub fn on_packet_sent(&mut self, bytes: usize) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_add(bytes as u32);
    }

    /// Called for each newly acknowledged in-flight packet
    #[inline]
    pub fn on_packet_ack(&mut self, sent_time: Timestamp, bytes: usize) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes as u32);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
        //# the sender MUST NOT increase its congestion
        //# window in response to acknowledgments of packets sent before the
        //# recovery period started
        if self.in_recovery(sent_time) {
            return;
        }

        if self.is_slow_start() {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.1
            //# While a sender is in slow start, the congestion window increases
            //# by the number of bytes acknowledged when each acknowledgment is
            //# processed.
            self.congestion_window = self.congestion_window.saturating_add(bytes as u32);
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.3
        //# a sender in congestion avoidance increases its congestion
        //# window by no more than one maximum datagram size for each
        //# congestion window that is acknowledged.
        //
        // approximated by accumulating acked bytes and growing by one
        // datagram each time the accumulator crosses the window
        self.bytes_acked = self.bytes_acked.saturating_add(bytes as u32);
        if self.bytes_acked >= self.congestion_window {
            self.bytes_acked -= self.congestion_window;
            self.congestion_window = self
                .congestion_window
                .saturating_add(self.max_datagram_size as u32);
        }
    }

    /// Called for each packet declared lost
    #[inline]
    pub fn on_packet_loss(&mut self, sent_time: Timestamp, bytes: usize, now: Timestamp) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes as u32);
        self.on_congestion_event(sent_time, now);
    }

    /// Reduces the window in response to loss or an ECN-CE signal
    #[inline]
    pub fn on_congestion_event(&mut self, sent_time: Timestamp, now: Timestamp) {
        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
        //# A sender enters a recovery period when it detects the loss of a
        //# packet or when the ECN-CE count reported by its peer increases.  A
        //# sender that is already in a recovery period stays in it and does
        //# not re-enter it.
        if self.in_recovery(sent_time) {
            return;
        }

        self.recovery_start_time = Some(now);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
        //# On entering a recovery period, a sender MUST set the slow start
        //# threshold to half the value of the congestion window when loss is
        //# detected.  The recovery period aims to limit congestion window
        //# reduction to once per round trip.
        self.congestion_window = (self.congestion_window / 2).max(self.minimum_window());
        self.ssthresh = self.congestion_window;
        self.bytes_acked = 0;
    }

    /// Handles an increase in the peer-reported ECN-CE count, bounded to one
    /// reduction per round trip
    #[inline]
    pub fn on_ecn_congestion(&mut self, sent_time: Timestamp, now: Timestamp, rtt: Duration) {
        if let Some(last) = self.last_ecn_congestion_event {
            if now.saturating_duration_since(last) < rtt {
                return;
            }
        }
        self.last_ecn_congestion_event = Some(now);
        self.on_congestion_event(sent_time, now);
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.2
    //# When persistent congestion is declared, the sender's congestion
    //# window MUST be reduced to the minimum congestion window
    //# (kMinimumWindow), similar to a TCP sender's response on an RTO
    //# [RFC5681].
    #[inline]
    pub fn on_persistent_congestion(&mut self) {
        self.congestion_window = self.minimum_window();
        self.recovery_start_time = None;
        self.bytes_acked = 0;
    }

    /// Called when a packet is removed from flight without being acked or
    /// lost, e.g. when its space is discarded
    #[inline]
    pub fn on_packet_discarded(&mut self, bytes: usize) {
        self.bytes_in_flight = self.bytes_in_flight.saturating_sub(bytes as u32);
    }

    #[inline]
    pub fn max_datagram_size(&self) -> u16 {
        self.max_datagram_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MSS: u16 = 1200;

    fn timestamp(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    #[test]
    fn initial_window_test() {
        let cc = NewReno::new(MSS);
        assert_eq!(cc.congestion_window(), 10 * MSS as u32);

        // large datagrams are clamped by the byte limit
        let cc = NewReno::new(9000);
        assert_eq!(cc.congestion_window(), 18_000);
    }

    #[test]
    fn slow_start_grows_by_acked_bytes() {
        let mut cc = NewReno::new(MSS);
        cc.on_packet_sent(1200);
        cc.on_packet_ack(timestamp(1), 1200);
        assert_eq!(cc.congestion_window(), 10 * MSS as u32 + 1200);
        assert_eq!(cc.bytes_in_flight(), 0);
        assert!(cc.is_slow_start());
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.3.2
    //= type=test
    //# On entering a recovery period, a sender MUST set the slow start
    //# threshold to half the value of the congestion window when loss is
    //# detected.
    #[test]
    fn loss_halves_window() {
        let mut cc = NewReno::new(MSS);
        cc.on_packet_sent(1200);
        cc.on_packet_loss(timestamp(1), 1200, timestamp(10));

        assert_eq!(cc.congestion_window(), 5 * MSS as u32);
        assert_eq!(cc.ssthresh, 5 * MSS as u32);
        assert!(!cc.is_slow_start());

        // a second loss from before the recovery point does not reduce again
        cc.on_packet_loss(timestamp(2), 0, timestamp(11));
        assert_eq!(cc.congestion_window(), 5 * MSS as u32);

        // acks for packets sent before recovery started do not grow the
        // window
        cc.on_packet_ack(timestamp(3), 1200);
        assert_eq!(cc.congestion_window(), 5 * MSS as u32);

        // an ack for a packet sent after recovery exits it and resumes
        // congestion avoidance growth
        cc.on_packet_sent(6000);
        let mut acked = 0;
        while acked < 6000 {
            cc.on_packet_ack(timestamp(20), 1200);
            acked += 1200;
        }
        assert!(cc.congestion_window() > 5 * MSS as u32);
    }

    #[test]
    fn window_floor_test() {
        let mut cc = NewReno::new(MSS);
        cc.on_packet_loss(timestamp(1), 0, timestamp(2));
        cc.on_packet_loss(timestamp(3), 0, timestamp(4));
        cc.on_packet_loss(timestamp(5), 0, timestamp(6));
        assert!(cc.congestion_window() >= 2 * MSS as u32);
    }

    #[test]
    fn persistent_congestion_collapses_window() {
        let mut cc = NewReno::new(MSS);
        cc.on_persistent_congestion();
        assert_eq!(cc.congestion_window(), 2 * MSS as u32);
        // the next acks grow the window again (slow start below ssthresh)
        assert!(cc.is_slow_start());
    }

    #[test]
    fn ecn_reduction_once_per_rtt() {
        let mut cc = NewReno::new(MSS);
        let rtt = Duration::from_millis(100);

        cc.on_ecn_congestion(timestamp(1), timestamp(10), rtt);
        let after_first = cc.congestion_window();
        assert_eq!(after_first, 5 * MSS as u32);

        // within the same round trip, no further reduction
        cc.on_ecn_congestion(timestamp(50), timestamp(60), rtt);
        assert_eq!(cc.congestion_window(), after_first);

        // after a full round trip, a new signal reduces again
        cc.on_ecn_congestion(timestamp(150), timestamp(200), rtt);
        assert!(cc.congestion_window() < after_first);
    }
}
