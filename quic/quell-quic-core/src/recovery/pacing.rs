// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    recovery::RttEstimator,
    time::{Duration, Timestamp},
};
use core::ops::Div;

struct Fraction(u32, u32);

impl Div<Fraction> for Duration {
    type Output = Duration;

    fn div(self, rhs: Fraction) -> Self::Output {
        self * rhs.1 / rhs.0
    }
}

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.7
//# Using a value for "N" that is small, but at least 1 (for example,
//# 1.25) ensures that variations in RTT do not result in
//# underutilization of the congestion window.
const N: Fraction = Fraction(5, 4); // 5/4 = 1.25

// The window grows rapidly during slow start, so a higher gain avoids the
// pacer itself becoming the bottleneck; the same choice is made in Linux
// TCP.
const SLOW_START_N: Fraction = Fraction(2, 1); // 2/1 = 2.00

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.7
//# Senders SHOULD limit bursts to the initial congestion window
const MAX_BURST_PACKETS: u16 = 10;

/// A packet pacer that spreads bursts of packets evenly over time
#[derive(Clone, Debug, Default)]
pub struct Pacer {
    // remaining byte capacity of the current departure time slot
    capacity: u32,
    // the time the next burst may be transmitted
    next_packet_departure_time: Option<Timestamp>,
}

impl Pacer {
    /// Called for each packet written to the wire
    #[inline]
    pub fn on_packet_sent(
        &mut self,
        now: Timestamp,
        bytes_sent: usize,
        rtt_estimator: &RttEstimator,
        congestion_window: u32,
        max_datagram_size: u16,
        slow_start: bool,
    ) {
        if self.capacity == 0 {
            if let Some(next_packet_departure_time) = self.next_packet_departure_time {
                let interval = Self::interval(
                    rtt_estimator,
                    congestion_window,
                    max_datagram_size,
                    slow_start,
                );
                self.next_packet_departure_time =
                    Some((next_packet_departure_time + interval).max(now));
            } else {
                self.next_packet_departure_time = Some(now);
            }
            self.capacity = (MAX_BURST_PACKETS * max_datagram_size) as u32;
        }

        self.capacity = self.capacity.saturating_sub(bytes_sent as u32);
    }

    /// Returns the earliest time the next packet may be transmitted.
    ///
    /// If the time is in the past or `None`, the packet should be
    /// transmitted immediately.
    #[inline]
    pub fn earliest_departure_time(&self) -> Option<Timestamp> {
        self.next_packet_departure_time
    }

    /// Returns true if a send at time `now` must wait for the pacer
    #[inline]
    pub fn is_blocked(&self, now: Timestamp) -> bool {
        self.capacity == 0
            && self
                .next_packet_departure_time
                .map_or(false, |time| time > now)
    }

    // Recalculate the interval between bursts of paced packets
    #[inline]
    fn interval(
        rtt_estimator: &RttEstimator,
        congestion_window: u32,
        max_datagram_size: u16,
        slow_start: bool,
    ) -> Duration {
        debug_assert_ne!(congestion_window, 0);

        let n = if slow_start { SLOW_START_N } else { N };

        // MAX_BURST_PACKETS is incorporated into the formula since bursts
        // of that size are spread evenly over time
        let packet_size = (MAX_BURST_PACKETS * max_datagram_size) as u32;

        //= https://www.rfc-editor.org/rfc/rfc9002#section-7.7
        //# rate = N * congestion_window / smoothed_rtt
        //#
        //# Or expressed as an inter-packet interval in units of time:
        //#
        //# interval = ( smoothed_rtt * packet_size / congestion_window ) / N
        (rtt_estimator.smoothed_rtt().max(Duration::from_millis(1)) * packet_size
            / congestion_window.max(1))
            / n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::number::PacketNumberSpace;

    fn timestamp(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    #[test]
    fn first_burst_departs_immediately() {
        let mut pacer = Pacer::default();
        let rtt = RttEstimator::default();

        assert!(!pacer.is_blocked(timestamp(0)));
        pacer.on_packet_sent(timestamp(0), 1200, &rtt, 12_000, 1200, true);
        assert_eq!(pacer.earliest_departure_time(), Some(timestamp(0)));
    }

    #[test]
    fn exhausted_burst_blocks_until_interval() {
        let mut pacer = Pacer::default();
        let mut rtt = RttEstimator::default();
        rtt.update_rtt(
            Duration::ZERO,
            Duration::from_millis(100),
            timestamp(0),
            true,
            PacketNumberSpace::ApplicationData,
        );

        let now = timestamp(1);
        // exhaust the first burst
        pacer.on_packet_sent(now, (10 * 1200) as usize, &rtt, 12_000, 1200, false);
        assert_eq!(pacer.capacity, 0);

        // the next send schedules a departure in the future
        pacer.on_packet_sent(now, 1200, &rtt, 12_000, 1200, false);
        let departure = pacer.earliest_departure_time().unwrap();
        assert!(departure > now);

        // rate = 1.25 * cwnd / srtt; a full burst interval at cwnd ==
        // 10 packets is srtt / 1.25 = 80ms
        assert_eq!(departure, now + Duration::from_millis(80));
    }

    #[test]
    fn slow_start_paces_faster() {
        let mut rtt = RttEstimator::default();
        rtt.update_rtt(
            Duration::ZERO,
            Duration::from_millis(100),
            timestamp(0),
            true,
            PacketNumberSpace::ApplicationData,
        );

        let slow = Pacer::interval(&rtt, 12_000, 1200, false);
        let fast = Pacer::interval(&rtt, 12_000, 1200, true);
        assert!(fast < slow);
    }
}
