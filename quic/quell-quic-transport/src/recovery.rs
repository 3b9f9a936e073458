// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-space loss detection
//!
//! Each packet number space owns one `Manager`. ACK processing, the packet
//! and time loss thresholds, the loss timer and probe scheduling follow
//! RFC 9002; the congestion controller and RTT estimator are shared across
//! spaces and passed in by the connection.

use alloc::vec::Vec;
use quell_quic_core::{
    crypto::EncryptionLevel,
    frame::{ack, ack_elicitation::AckElicitation, Ack},
    inet::EcnCounts,
    packet::number::{PacketNumber, PacketNumberSpace},
    recovery::{NewReno, RttEstimator, SentPacketInfo, SentPackets, K_PACKET_THRESHOLD},
    stream::{StreamId, StreamType},
    time::{Duration, Timestamp},
    transport, transport_error,
    varint::VarInt,
};
use smallvec::SmallVec;

/// The state needed to reconstruct a frame if its packet is lost
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Retransmit {
    Stream {
        id: StreamId,
        offset: u64,
        len: u64,
        is_fin: bool,
    },
    Crypto {
        level: EncryptionLevel,
        offset: u64,
        len: u64,
    },
    ResetStream {
        id: StreamId,
    },
    StopSending {
        id: StreamId,
    },
    MaxData,
    MaxStreamData {
        id: StreamId,
    },
    MaxStreams {
        stream_type: StreamType,
    },
    HandshakeDone,
    NewConnectionId {
        sequence_number: VarInt,
    },
    RetireConnectionId {
        sequence_number: VarInt,
    },
    NewToken,
    Ping,
}

/// The retransmittable contents of one packet
pub type FrameList = SmallVec<[Retransmit; 4]>;

/// The outcome of processing one ACK frame
#[derive(Debug, Default)]
pub struct AckOutcome {
    pub acked: Vec<(PacketNumber, SentPacketInfo<FrameList>)>,
    pub lost: Vec<(PacketNumber, SentPacketInfo<FrameList>)>,
    /// True when a newly acknowledged packet was ack-eliciting; resets the
    /// PTO backoff
    pub newly_acked_ack_eliciting: bool,
}

/// Loss detection state for one packet number space
#[derive(Debug)]
pub struct Manager {
    space: PacketNumberSpace,
    sent: SentPackets<FrameList>,
    largest_sent: Option<u64>,
    largest_acked: Option<PacketNumber>,
    /// The earliest time at which an unacknowledged packet will be declared
    /// lost by the time threshold
    loss_time: Option<Timestamp>,
    /// When the most recent ack-eliciting packet was sent, arming the PTO
    time_of_last_ack_eliciting: Option<Timestamp>,
    /// The highest ECN counts the peer has reported for this space
    peer_ecn_counts: Option<EcnCounts>,
}

impl Manager {
    pub fn new(space: PacketNumberSpace) -> Self {
        Self {
            space,
            sent: SentPackets::new(),
            largest_sent: None,
            largest_acked: None,
            loss_time: None,
            time_of_last_ack_eliciting: None,
            peer_ecn_counts: None,
        }
    }

    #[inline]
    pub fn space(&self) -> PacketNumberSpace {
        self.space
    }

    #[inline]
    pub fn largest_acked(&self) -> Option<PacketNumber> {
        self.largest_acked
    }

    #[inline]
    pub fn has_ack_eliciting_in_flight(&self) -> bool {
        self.sent.has_ack_eliciting_in_flight()
    }

    /// Records a sent packet
    pub fn on_packet_sent(
        &mut self,
        packet_number: PacketNumber,
        info: SentPacketInfo<FrameList>,
        congestion_controller: &mut NewReno,
    ) {
        self.largest_sent = Some(
            self.largest_sent
                .map_or(packet_number.as_u64(), |prev| prev.max(packet_number.as_u64())),
        );

        if info.ack_elicitation.is_ack_eliciting() {
            self.time_of_last_ack_eliciting = Some(info.time_sent);
        }
        if info.in_flight {
            congestion_controller.on_packet_sent(info.sent_bytes as usize);
        }

        self.sent.insert(packet_number, info);
    }

    /// Processes an ACK frame for this space
    #[allow(clippy::too_many_arguments)]
    pub fn on_ack_received<A: ack::AckRanges>(
        &mut self,
        frame: &Ack<A>,
        ack_delay: Duration,
        now: Timestamp,
        handshake_confirmed: bool,
        rtt: &mut RttEstimator,
        congestion_controller: &mut NewReno,
    ) -> Result<AckOutcome, transport::Error> {
        let largest_acknowledged = frame.largest_acknowledged();

        //= https://www.rfc-editor.org/rfc/rfc9000#section-13.1
        //# An endpoint SHOULD treat receipt of an acknowledgment for a packet
        //# it did not send as a connection error of type PROTOCOL_VIOLATION
        if self
            .largest_sent
            .map_or(true, |sent| largest_acknowledged.as_u64() > sent)
        {
            return Err(transport_error!(
                PROTOCOL_VIOLATION,
                "ack received for an unsent packet number"
            ));
        }

        let mut outcome = AckOutcome::default();
        let mut largest_newly_acked: Option<(PacketNumber, Timestamp, AckElicitation)> = None;

        for range in frame.ack_ranges.ack_ranges() {
            let acked = self.sent.remove_range(
                self.space,
                range.start().as_u64(),
                range.end().as_u64(),
            );
            for (packet_number, info) in acked {
                if largest_newly_acked
                    .map_or(true, |(largest, ..)| packet_number > largest)
                {
                    largest_newly_acked =
                        Some((packet_number, info.time_sent, info.ack_elicitation));
                }
                if info.ack_elicitation.is_ack_eliciting() {
                    outcome.newly_acked_ack_eliciting = true;
                }
                if info.in_flight {
                    congestion_controller.on_packet_ack(info.time_sent, info.sent_bytes as usize);
                }
                outcome.acked.push((packet_number, info));
            }
        }

        //= https://www.rfc-editor.org/rfc/rfc9002#section-5.1
        //# An endpoint generates an RTT sample on receiving an ACK frame that
        //# meets the following two conditions:
        //#
        //# *  the largest acknowledged packet number is newly acknowledged,
        //#    and
        //#
        //# *  at least one of the newly acknowledged packets was ack-
        //#    eliciting.
        if let Some((packet_number, time_sent, _)) = largest_newly_acked {
            if packet_number == self.space.new_packet_number(largest_acknowledged)
                && outcome.newly_acked_ack_eliciting
            {
                let rtt_sample = now.saturating_duration_since(time_sent);
                rtt.update_rtt(ack_delay, rtt_sample, now, handshake_confirmed, self.space);
            }
        }

        if let Some(ecn_counts) = &frame.ecn_counts {
            self.on_ecn_counts(
                *ecn_counts,
                largest_newly_acked,
                now,
                rtt,
                congestion_controller,
            )?;
        }

        let largest_acknowledged = self.space.new_packet_number(largest_acknowledged);
        self.largest_acked = Some(
            self.largest_acked
                .map_or(largest_acknowledged, |prev| prev.max(largest_acknowledged)),
        );

        outcome.lost = self.detect_lost_packets(now, rtt, congestion_controller);

        Ok(outcome)
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-13.4.2.1
    //# An endpoint that receives an ACK frame with ECN counts [...] MUST
    //# treat a decrease in any of these counts as a connection error of
    //# type PROTOCOL_VIOLATION.
    fn on_ecn_counts(
        &mut self,
        counts: EcnCounts,
        largest_newly_acked: Option<(PacketNumber, Timestamp, AckElicitation)>,
        now: Timestamp,
        rtt: &RttEstimator,
        congestion_controller: &mut NewReno,
    ) -> Result<(), transport::Error> {
        if let Some(baseline) = &self.peer_ecn_counts {
            if !counts.is_monotonic_increase_from(baseline) {
                return Err(transport_error!(
                    PROTOCOL_VIOLATION,
                    "ecn counts decreased"
                ));
            }

            //= https://www.rfc-editor.org/rfc/rfc9002#section-7.1
            //# If a path has been validated to support Explicit Congestion
            //# Notification (ECN) [...] QUIC treats a Congestion Experienced
            //# (CE) codepoint in the IP header as a signal of congestion.
            if counts.ce_count > baseline.ce_count {
                if let Some((_, time_sent, _)) = largest_newly_acked {
                    congestion_controller.on_ecn_congestion(
                        time_sent,
                        now,
                        rtt.smoothed_rtt(),
                    );
                }
            }
        }
        self.peer_ecn_counts = Some(counts);
        Ok(())
    }

    /// Declares packets lost by the packet and time thresholds
    fn detect_lost_packets(
        &mut self,
        now: Timestamp,
        rtt: &RttEstimator,
        congestion_controller: &mut NewReno,
    ) -> Vec<(PacketNumber, SentPacketInfo<FrameList>)> {
        let Some(largest_acked) = self.largest_acked else {
            return Vec::new();
        };

        self.loss_time = None;

        //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
        //# The time threshold is:
        //#
        //# max(kTimeThreshold * max(smoothed_rtt, latest_rtt), kGranularity)
        let loss_delay = rtt.loss_time_threshold();
        let lost_send_time = now.checked_sub(loss_delay);

        let mut lost_numbers = Vec::new();
        for (packet_number, info) in self.sent.iter(self.space) {
            if packet_number > largest_acked {
                continue;
            }

            //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.1
            //# the packet was sent kPacketThreshold packets before an
            //# acknowledged packet (Section 6.1.1)
            let by_packet_threshold = largest_acked.as_u64()
                >= packet_number.as_u64() + K_PACKET_THRESHOLD;

            //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
            //# [the packet] was sent long enough in the past (Section 6.1.2).
            let by_time_threshold =
                lost_send_time.map_or(false, |cutoff| info.time_sent <= cutoff);

            if by_packet_threshold || by_time_threshold {
                lost_numbers.push(packet_number);
            } else {
                //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.2
                //# If packets sent prior to the largest acknowledged packet
                //# cannot yet be declared lost, then a timer SHOULD be set for
                //# the remaining time.
                let when = info.time_sent + loss_delay;
                self.loss_time = Some(self.loss_time.map_or(when, |prev| prev.min(when)));
            }
        }

        let mut lost = Vec::with_capacity(lost_numbers.len());
        for packet_number in lost_numbers {
            if let Some(info) = self.sent.remove(packet_number) {
                if info.in_flight {
                    congestion_controller.on_packet_loss(
                        info.time_sent,
                        info.sent_bytes as usize,
                        now,
                    );
                }
                lost.push((packet_number, info));
            }
        }

        self.detect_persistent_congestion(&lost, rtt, congestion_controller);

        lost
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-7.6.2
    //# A sender establishes persistent congestion after the receipt of an
    //# acknowledgment if two packets that are ack-eliciting are declared
    //# lost, and:
    //#
    //# *  across all packet number spaces, none of the packets sent between
    //#    the send times of these two packets are acknowledged;
    //#
    //# *  the duration between the send times of these two packets exceeds
    //#    the persistent congestion duration (Section 7.6.1); and
    //#
    //# *  a prior RTT sample existed when these two packets were sent.
    fn detect_persistent_congestion(
        &self,
        lost: &[(PacketNumber, SentPacketInfo<FrameList>)],
        rtt: &RttEstimator,
        congestion_controller: &mut NewReno,
    ) {
        let Some(first_sample) = rtt.first_rtt_sample() else {
            return;
        };

        let eliciting_times: Vec<Timestamp> = lost
            .iter()
            .filter(|(_, info)| info.ack_elicitation.is_ack_eliciting())
            .map(|(_, info)| info.time_sent)
            .collect();

        let (Some(&earliest), Some(&latest)) =
            (eliciting_times.iter().min(), eliciting_times.iter().max())
        else {
            return;
        };

        if earliest < first_sample {
            return;
        }

        if latest.saturating_duration_since(earliest) > rtt.persistent_congestion_threshold() {
            congestion_controller.on_persistent_congestion();
        }
    }

    /// The deadline of the time-threshold loss timer, if armed
    #[inline]
    pub fn loss_time(&self) -> Option<Timestamp> {
        self.loss_time
    }

    /// The PTO deadline for this space, if armed
    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.2.1
    //# A sender SHOULD restart its PTO timer every time an ack-eliciting
    //# packet is sent or acknowledged
    pub fn pto_deadline(&self, pto_backoff: u32, rtt: &RttEstimator) -> Option<Timestamp> {
        if !self.sent.has_ack_eliciting_in_flight() {
            return None;
        }
        let base = self.time_of_last_ack_eliciting?;
        Some(base + rtt.pto_period(pto_backoff, self.space))
    }

    /// Handles the time-threshold loss timer firing
    pub fn on_loss_timeout(
        &mut self,
        now: Timestamp,
        rtt: &RttEstimator,
        congestion_controller: &mut NewReno,
    ) -> Vec<(PacketNumber, SentPacketInfo<FrameList>)> {
        self.detect_lost_packets(now, rtt, congestion_controller)
    }

    /// Discards the space, removing its packets from flight without
    /// declaring them lost
    pub fn discard(&mut self, congestion_controller: &mut NewReno) {
        for info in self.sent.drain() {
            if info.in_flight {
                congestion_controller.on_packet_discarded(info.sent_bytes as usize);
            }
        }
        self.loss_time = None;
        self.time_of_last_ack_eliciting = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quell_quic_core::inet::ExplicitCongestionNotification;

    const MSS: u16 = 1200;

    fn timestamp(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    fn info(millis: u64) -> SentPacketInfo<FrameList> {
        SentPacketInfo {
            sent_bytes: MSS,
            time_sent: timestamp(millis),
            ack_elicitation: AckElicitation::Eliciting,
            in_flight: true,
            ecn: ExplicitCongestionNotification::NotEct,
            retransmit: FrameList::new(),
        }
    }

    struct AckOf {
        ranges: Vec<(u64, u64)>,
    }

    impl ack::AckRanges for &AckOf {
        type Iter = alloc::vec::IntoIter<core::ops::RangeInclusive<VarInt>>;

        fn ack_ranges(&self) -> Self::Iter {
            self.ranges
                .iter()
                .map(|&(s, e)| VarInt::new(s).unwrap()..=VarInt::new(e).unwrap())
                .collect::<Vec<_>>()
                .into_iter()
        }

        fn largest_acknowledged(&self) -> VarInt {
            VarInt::new(self.ranges[0].1).unwrap()
        }

        fn interval_len(&self) -> usize {
            self.ranges.len() - 1
        }
    }

    fn ack_frame(ranges: Vec<(u64, u64)>) -> (AckOf, ()) {
        (AckOf { ranges }, ())
    }

    fn setup() -> (Manager, RttEstimator, NewReno) {
        (
            Manager::new(PacketNumberSpace::ApplicationData),
            RttEstimator::default(),
            NewReno::new(MSS),
        )
    }

    fn send(manager: &mut Manager, cc: &mut NewReno, pn: u64, millis: u64) {
        let space = PacketNumberSpace::ApplicationData;
        manager.on_packet_sent(
            space.new_packet_number(VarInt::new(pn).unwrap()),
            info(millis),
            cc,
        );
    }

    //= https://www.rfc-editor.org/rfc/rfc9002#section-6.1.1
    //= type=test
    //# the packet was sent kPacketThreshold packets before an
    //# acknowledged packet
    #[test]
    fn packet_threshold_loss_test() {
        let (mut manager, mut rtt, mut cc) = setup();

        for pn in 1..=5u64 {
            send(&mut manager, &mut cc, pn, pn);
        }

        let (ranges, _) = ack_frame(alloc::vec![(5, 5)]);
        let frame = Ack {
            ack_delay: VarInt::ZERO,
            ack_ranges: &ranges,
            ecn_counts: None,
        };

        let outcome = manager
            .on_ack_received(&frame, Duration::ZERO, timestamp(100), true, &mut rtt, &mut cc)
            .unwrap();

        assert_eq!(outcome.acked.len(), 1);
        // packets 1 and 2 are at least 3 below the largest acked
        let lost: Vec<u64> = outcome.lost.iter().map(|(pn, _)| pn.as_u64()).collect();
        assert_eq!(lost, alloc::vec![1, 2]);

        // 3 and 4 wait on the time threshold
        assert!(manager.loss_time().is_some());
        assert!(manager.has_ack_eliciting_in_flight());
    }

    #[test]
    fn time_threshold_loss_test() {
        let (mut manager, mut rtt, mut cc) = setup();

        send(&mut manager, &mut cc, 1, 0);
        send(&mut manager, &mut cc, 2, 1000);

        let (ranges, _) = ack_frame(alloc::vec![(2, 2)]);
        let frame = Ack {
            ack_delay: VarInt::ZERO,
            ack_ranges: &ranges,
            ecn_counts: None,
        };

        // packet 1 is only one below largest, but was sent far in the past
        let outcome = manager
            .on_ack_received(&frame, Duration::ZERO, timestamp(2000), true, &mut rtt, &mut cc)
            .unwrap();

        let lost: Vec<u64> = outcome.lost.iter().map(|(pn, _)| pn.as_u64()).collect();
        assert_eq!(lost, alloc::vec![1]);
    }

    #[test]
    fn ack_for_unsent_packet_test() {
        let (mut manager, mut rtt, mut cc) = setup();
        send(&mut manager, &mut cc, 1, 1);

        let (ranges, _) = ack_frame(alloc::vec![(5, 5)]);
        let frame = Ack {
            ack_delay: VarInt::ZERO,
            ack_ranges: &ranges,
            ecn_counts: None,
        };

        let error = manager
            .on_ack_received(&frame, Duration::ZERO, timestamp(10), true, &mut rtt, &mut cc)
            .unwrap_err();
        assert_eq!(error.code, transport::Error::PROTOCOL_VIOLATION);
    }

    #[test]
    fn ecn_decrease_is_protocol_violation() {
        let (mut manager, mut rtt, mut cc) = setup();
        for pn in 1..=4u64 {
            send(&mut manager, &mut cc, pn, pn);
        }

        let counts = EcnCounts {
            ect_0_count: VarInt::from_u8(3),
            ect_1_count: VarInt::ZERO,
            ce_count: VarInt::ZERO,
        };

        let (ranges, _) = ack_frame(alloc::vec![(1, 1)]);
        let frame = Ack {
            ack_delay: VarInt::ZERO,
            ack_ranges: &ranges,
            ecn_counts: Some(counts),
        };
        manager
            .on_ack_received(&frame, Duration::ZERO, timestamp(10), true, &mut rtt, &mut cc)
            .unwrap();

        // a later ack reporting fewer ECT(0) marks is invalid
        let mut decreased = counts;
        decreased.ect_0_count = VarInt::from_u8(2);
        let (ranges, _) = ack_frame(alloc::vec![(2, 2)]);
        let frame = Ack {
            ack_delay: VarInt::ZERO,
            ack_ranges: &ranges,
            ecn_counts: Some(decreased),
        };
        let error = manager
            .on_ack_received(&frame, Duration::ZERO, timestamp(20), true, &mut rtt, &mut cc)
            .unwrap_err();
        assert_eq!(error.code, transport::Error::PROTOCOL_VIOLATION);
    }

    #[test]
    fn rtt_sampled_from_largest_newly_acked() {
        let (mut manager, mut rtt, mut cc) = setup();
        send(&mut manager, &mut cc, 1, 100);

        let (ranges, _) = ack_frame(alloc::vec![(1, 1)]);
        let frame = Ack {
            ack_delay: VarInt::ZERO,
            ack_ranges: &ranges,
            ecn_counts: None,
        };
        manager
            .on_ack_received(&frame, Duration::ZERO, timestamp(180), true, &mut rtt, &mut cc)
            .unwrap();

        assert_eq!(rtt.latest_rtt(), Duration::from_millis(80));
    }

    #[test]
    fn discard_removes_bytes_from_flight() {
        let (mut manager, _, mut cc) = setup();
        send(&mut manager, &mut cc, 1, 1);
        send(&mut manager, &mut cc, 2, 2);
        assert_eq!(cc.bytes_in_flight(), 2 * MSS as u32);

        let window_before = cc.congestion_window();
        manager.discard(&mut cc);
        assert_eq!(cc.bytes_in_flight(), 0);
        // discarding is not a loss signal
        assert_eq!(cc.congestion_window(), window_before);
    }
}
