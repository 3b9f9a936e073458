// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    packet::number::PacketNumberSpace,
    time::{Duration, Timestamp},
};
use core::cmp::{max, min};

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.2
//# When no previous RTT is available, the initial RTT
//# SHOULD be set to 333 milliseconds.  This results in handshakes
//# starting with a PTO of 1 second, as recommended for TCP's initial
//# RTO; see Section 2 of [RFC6298].
pub const DEFAULT_INITIAL_RTT: Duration = Duration::from_millis(333);

/// The lowest RTT value the estimator tracks
pub const MIN_RTT: Duration = Duration::from_micros(1);

//= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
//# The RECOMMENDED value of the timer granularity (kGranularity) is 1
//# millisecond.
pub const K_GRANULARITY: Duration = Duration::from_millis(1);

//= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.1
//# The RECOMMENDED value for kPersistentCongestionThreshold is 3, which
//# results in behavior that is approximately equivalent to a TCP sender
//# declaring an RTO after two TLPs.
const K_PERSISTENT_CONGESTION_THRESHOLD: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RttEstimator {
    /// Latest RTT sample
    latest_rtt: Duration,
    /// The minimum value observed over the lifetime of the connection
    min_rtt: Duration,
    /// An exponentially-weighted moving average
    smoothed_rtt: Duration,
    /// The variance in the observed RTT samples
    rttvar: Duration,
    /// The peer's maximum acknowledgment delay for the application space
    max_ack_delay: Duration,
    /// The time the first RTT sample was obtained
    first_rtt_sample: Option<Timestamp>,
}

impl Default for RttEstimator {
    fn default() -> Self {
        RttEstimator::new(DEFAULT_INITIAL_RTT)
    }
}

impl RttEstimator {
    /// Creates a new estimator with the given `initial_rtt`.
    ///
    /// `on_max_ack_delay` must be called when the peer's max_ack_delay
    /// transport parameter arrives.
    #[inline]
    pub fn new(initial_rtt: Duration) -> Self {
        let initial_rtt = initial_rtt.max(MIN_RTT);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# smoothed_rtt = kInitialRtt
        //# rttvar = kInitialRtt / 2
        Self {
            latest_rtt: initial_rtt,
            min_rtt: initial_rtt,
            smoothed_rtt: initial_rtt,
            rttvar: initial_rtt / 2,
            max_ack_delay: Duration::ZERO,
            first_rtt_sample: None,
        }
    }

    #[inline]
    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }

    #[inline]
    pub fn smoothed_rtt(&self) -> Duration {
        self.smoothed_rtt
    }

    #[inline]
    pub fn min_rtt(&self) -> Duration {
        self.min_rtt
    }

    #[inline]
    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }

    #[inline]
    pub fn first_rtt_sample(&self) -> Option<Timestamp> {
        self.first_rtt_sample
    }

    #[inline]
    pub fn max_ack_delay(&self) -> Duration {
        self.max_ack_delay
    }

    /// Sets the `max_ack_delay` value from the peer's transport parameters
    pub fn on_max_ack_delay(&mut self, max_ack_delay: Duration) {
        self.max_ack_delay = max_ack_delay;
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
    //# When an ack-eliciting packet is transmitted, the sender schedules a
    //# timer for the PTO period as follows:
    //#
    //# PTO = smoothed_rtt + max(4*rttvar, kGranularity) + max_ack_delay
    #[inline]
    pub fn pto_period(&self, pto_backoff: u32, space: PacketNumberSpace) -> Duration {
        let mut pto_period = self.smoothed_rtt;

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# The PTO period MUST be at least kGranularity, to avoid the timer
        //# expiring immediately.
        pto_period += max(4 * self.rttvar, K_GRANULARITY);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# When the PTO is armed for Initial or Handshake packet number
        //# spaces, the max_ack_delay in the PTO period computation is set to
        //# 0, since the peer is expected to not delay these packets
        //# intentionally; see Section 13.2.1 of [QUIC-TRANSPORT].
        if space.is_application_data() {
            pto_period += self.max_ack_delay;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
        //# Even when there are ack-eliciting packets in flight in multiple
        //# packet number spaces, the exponential increase in PTO occurs across
        //# all spaces to prevent excess load on the network.
        pto_period * pto_backoff
    }

    /// Updates the estimate with `rtt_sample`, adjusted by the peer's
    /// reported `ack_delay`
    #[inline]
    pub fn update_rtt(
        &mut self,
        mut ack_delay: Duration,
        rtt_sample: Duration,
        timestamp: Timestamp,
        is_handshake_confirmed: bool,
        space: PacketNumberSpace,
    ) {
        self.latest_rtt = rtt_sample.max(MIN_RTT);

        if self.first_rtt_sample.is_none() {
            self.first_rtt_sample = Some(timestamp);
            //= https://www.rfc-editor.org/rfc/rfc9002#section-5.2
            //# min_rtt MUST be set to the latest_rtt on the first RTT sample.
            self.min_rtt = self.latest_rtt;
            //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
            //# smoothed_rtt = latest_rtt
            //# rttvar = latest_rtt / 2
            self.smoothed_rtt = self.latest_rtt;
            self.rttvar = self.latest_rtt / 2;
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.2
        //# min_rtt MUST be set to the lesser of min_rtt and latest_rtt
        //# (Section 5.1) on all other samples.
        self.min_rtt = min(self.min_rtt, self.latest_rtt);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  MAY ignore the acknowledgment delay for Initial packets, since
        //#    these acknowledgments are not delayed by the peer (Section
        //#    13.2.1 of [QUIC-TRANSPORT]);
        if space.is_initial() {
            ack_delay = Duration::ZERO;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  MUST use the lesser of the acknowledgment delay and the peer's
        //#    max_ack_delay after the handshake is confirmed; and
        if is_handshake_confirmed {
            ack_delay = min(ack_delay, self.max_ack_delay);
        }

        let mut adjusted_rtt = self.latest_rtt;

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# *  MUST NOT subtract the acknowledgment delay from the RTT sample if
        //#    the resulting value is smaller than the min_rtt.
        if self.min_rtt + ack_delay < self.latest_rtt {
            adjusted_rtt -= ack_delay;
        } else if !is_handshake_confirmed {
            //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
            //# Therefore, prior to handshake confirmation, an endpoint MAY
            //# ignore RTT samples if adjusting the RTT sample for
            //# acknowledgment delay causes the sample to be less than the
            //# min_rtt.
            return;
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
        //# smoothed_rtt = 7/8 * smoothed_rtt + 1/8 * adjusted_rtt
        //# rttvar_sample = abs(smoothed_rtt - adjusted_rtt)
        //# rttvar = 3/4 * rttvar + 1/4 * rttvar_sample
        //
        // the rttvar update uses the pre-update smoothed_rtt, following the
        // errata reported in https://www.rfc-editor.org/errata/eid7539
        let rttvar_sample = abs_difference(self.smoothed_rtt, adjusted_rtt);
        self.rttvar = weighted_average(self.rttvar, rttvar_sample, 4);
        self.smoothed_rtt = weighted_average(self.smoothed_rtt, adjusted_rtt, 8);
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.1
    //# The persistent congestion duration is computed as follows:
    //#
    //# (smoothed_rtt + max(4*rttvar, kGranularity) + max_ack_delay) *
    //#     kPersistentCongestionThreshold
    #[inline]
    pub fn persistent_congestion_threshold(&self) -> Duration {
        (self.smoothed_rtt + max(4 * self.rttvar, K_GRANULARITY) + self.max_ack_delay)
            * K_PERSISTENT_CONGESTION_THRESHOLD
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
    //# The time threshold is:
    //#
    //# max(kTimeThreshold * max(smoothed_rtt, latest_rtt), kGranularity)
    #[inline]
    pub fn loss_time_threshold(&self) -> Duration {
        let mut time_threshold = max(self.smoothed_rtt, self.latest_rtt);

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
        //# The RECOMMENDED time threshold (kTimeThreshold), expressed as an
        //# RTT multiplier, is 9/8.
        time_threshold += time_threshold / 8;

        max(time_threshold, K_GRANULARITY)
    }
}

#[inline]
fn abs_difference(a: Duration, b: Duration) -> Duration {
    if a > b {
        a - b
    } else {
        b - a
    }
}

/// `(prev * (weight - 1) + sample) / weight` with sub-millisecond precision
#[inline]
fn weighted_average(prev: Duration, sample: Duration, weight: u32) -> Duration {
    (prev * (weight - 1) + sample) / weight
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timestamp(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    #[test]
    fn first_sample_initializes_estimate() {
        let mut estimator = RttEstimator::default();
        assert_eq!(estimator.smoothed_rtt(), DEFAULT_INITIAL_RTT);

        estimator.update_rtt(
            Duration::ZERO,
            Duration::from_millis(100),
            timestamp(1),
            false,
            PacketNumberSpace::Initial,
        );

        assert_eq!(estimator.smoothed_rtt(), Duration::from_millis(100));
        assert_eq!(estimator.rttvar(), Duration::from_millis(50));
        assert_eq!(estimator.min_rtt(), Duration::from_millis(100));
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-5.3
    //= type=test
    //# smoothed_rtt = 7/8 * smoothed_rtt + 1/8 * adjusted_rtt
    #[test]
    fn ewma_update_test() {
        let mut estimator = RttEstimator::default();

        // seed smoothed = 100ms, rttvar = 50ms
        estimator.update_rtt(
            Duration::ZERO,
            Duration::from_millis(100),
            timestamp(1),
            true,
            PacketNumberSpace::ApplicationData,
        );

        // a 200ms sample yields smoothed = 112.5ms, rttvar = 62.5ms
        estimator.update_rtt(
            Duration::ZERO,
            Duration::from_millis(200),
            timestamp(2),
            true,
            PacketNumberSpace::ApplicationData,
        );

        assert_eq!(estimator.smoothed_rtt(), Duration::from_micros(112_500));
        assert_eq!(estimator.rttvar(), Duration::from_micros(62_500));
        assert_eq!(estimator.min_rtt(), Duration::from_millis(100));
    }

    #[test]
    fn ack_delay_is_capped_after_confirmation() {
        let mut estimator = RttEstimator::default();
        estimator.on_max_ack_delay(Duration::from_millis(25));

        estimator.update_rtt(
            Duration::ZERO,
            Duration::from_millis(100),
            timestamp(1),
            true,
            PacketNumberSpace::ApplicationData,
        );

        // a 300ms delay report is capped to max_ack_delay
        estimator.update_rtt(
            Duration::from_millis(300),
            Duration::from_millis(200),
            timestamp(2),
            true,
            PacketNumberSpace::ApplicationData,
        );

        // adjusted = 200 - 25 = 175ms
        let expected = weighted_average(
            Duration::from_millis(100),
            Duration::from_millis(175),
            8,
        );
        assert_eq!(estimator.smoothed_rtt(), expected);
    }

    #[test]
    fn pto_period_test() {
        let mut estimator = RttEstimator::default();
        estimator.on_max_ack_delay(Duration::from_millis(25));
        estimator.update_rtt(
            Duration::ZERO,
            Duration::from_millis(100),
            timestamp(1),
            true,
            PacketNumberSpace::ApplicationData,
        );

        let base = estimator.pto_period(1, PacketNumberSpace::Handshake);
        assert_eq!(base, Duration::from_millis(100) + Duration::from_millis(200));

        // application space adds max_ack_delay
        let app = estimator.pto_period(1, PacketNumberSpace::ApplicationData);
        assert_eq!(app, base + Duration::from_millis(25));

        // backoff doubles the period
        assert_eq!(estimator.pto_period(2, PacketNumberSpace::Handshake), base * 2);
    }
}
