// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-space packet state: send counters, the received-packet log that
//! produces ACK frames, protection keys and loss detection

use crate::recovery;
use quell_quic_core::{
    ack,
    frame::ack_elicitation::AckElicitation,
    inet::{EcnCounts, ExplicitCongestionNotification},
    packet::{number::{PacketNumber, PacketNumberSpace}, short::KeyPhase},
    time::{Duration, Timestamp},
    transport, transport_error,
    varint::VarInt,
};
use quell_quic_crypto::{DirectionalKeys, KeyPair, Secret};

/// State for one packet number space
pub struct PacketSpace {
    space: PacketNumberSpace,
    /// The number for the next packet sent in this space
    next_packet_number: u64,
    /// The received-packet log, used for ACK generation and duplicate
    /// rejection
    received: ack::Ranges,
    largest_received: Option<PacketNumber>,
    /// When the largest received ack-eliciting packet arrived, reported as
    /// ack_delay
    largest_received_time: Option<Timestamp>,
    /// Count of ack-eliciting packets received since the last ACK was sent
    unacked_eliciting: u64,
    /// The deadline by which an ACK must be sent, armed by ack-eliciting
    /// receipts
    ack_deadline: Option<Timestamp>,
    /// ECN counts observed on received packets, reported in ACK_ECN
    ecn_counts: EcnCounts,
    /// Loss detection for this space
    pub recovery: recovery::Manager,
    keys: SpaceKeys,
}

enum SpaceKeys {
    /// Keys are managed by the handshake until they are installed
    None,
    /// Initial and Handshake levels use a fixed key pair
    Fixed(KeyPair),
    /// The application space carries key-update machinery
    OneRtt(OneRttKeySet),
}

impl PacketSpace {
    pub fn new(space: PacketNumberSpace) -> Self {
        Self {
            space,
            next_packet_number: 0,
            received: ack::Ranges::new(),
            largest_received: None,
            largest_received_time: None,
            unacked_eliciting: 0,
            ack_deadline: None,
            ecn_counts: EcnCounts::default(),
            recovery: recovery::Manager::new(space),
            keys: SpaceKeys::None,
        }
    }

    #[inline]
    pub fn space(&self) -> PacketNumberSpace {
        self.space
    }

    pub fn install_keys(&mut self, keys: KeyPair) {
        debug_assert!(!self.space.is_application_data());
        self.keys = SpaceKeys::Fixed(keys);
    }

    pub fn install_one_rtt_keys(&mut self, local: Secret, peer: Secret) {
        debug_assert!(self.space.is_application_data());
        self.keys = SpaceKeys::OneRtt(OneRttKeySet::new(local, peer));
    }

    pub fn has_keys(&self) -> bool {
        !matches!(self.keys, SpaceKeys::None)
    }

    /// The keys for opening inbound Initial/Handshake packets
    pub fn opener(&self) -> Option<&DirectionalKeys> {
        match &self.keys {
            SpaceKeys::Fixed(pair) => Some(&pair.opener),
            SpaceKeys::OneRtt(set) => Some(&set.current.opener),
            SpaceKeys::None => None,
        }
    }

    /// The keys for sealing outbound packets
    pub fn sealer(&self) -> Option<&DirectionalKeys> {
        match &self.keys {
            SpaceKeys::Fixed(pair) => Some(&pair.sealer),
            SpaceKeys::OneRtt(set) => Some(&set.current.sealer),
            SpaceKeys::None => None,
        }
    }

    pub fn one_rtt_keys_mut(&mut self) -> Option<&mut OneRttKeySet> {
        match &mut self.keys {
            SpaceKeys::OneRtt(set) => Some(set),
            _ => None,
        }
    }

    pub fn one_rtt_keys(&self) -> Option<&OneRttKeySet> {
        match &self.keys {
            SpaceKeys::OneRtt(set) => Some(set),
            _ => None,
        }
    }

    /// Allocates the next packet number
    //= https://www.rfc-editor.org/rfc/rfc9000#section-12.3
    //# A QUIC endpoint MUST NOT reuse a packet number within the same
    //# packet number space in one connection.  If the packet number for
    //# sending reaches 2^62-1, the sender MUST close the connection
    pub fn next_packet_number(&mut self) -> Result<PacketNumber, transport::Error> {
        let value = VarInt::new(self.next_packet_number).map_err(|_| {
            transport_error!(AEAD_LIMIT_REACHED, "packet number space exhausted")
        })?;
        self.next_packet_number += 1;
        Ok(self.space.new_packet_number(value))
    }

    /// Returns true if the packet number was already received and
    /// processed
    pub fn received_contains(&self, packet_number: PacketNumber) -> bool {
        self.received.contains(packet_number.as_varint())
    }

    /// The packet number to decode truncated numbers against
    pub fn expected_packet_number(&self) -> PacketNumber {
        self.largest_received
            .unwrap_or_else(|| self.space.new_packet_number(VarInt::ZERO))
    }

    /// Records receipt of a packet that authenticated successfully.
    ///
    /// Returns `false` for duplicates, which must not be processed again.
    pub fn on_packet_received(
        &mut self,
        packet_number: PacketNumber,
        ack_elicitation: AckElicitation,
        ecn: ExplicitCongestionNotification,
        now: Timestamp,
        max_ack_delay: Duration,
    ) -> bool {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-12.3
        //# A receiver MUST discard a newly unprotected packet unless it is
        //# certain that it has not processed another packet with the same
        //# packet number from the same packet number space.
        if !self.received.insert(packet_number.as_varint()) {
            return false;
        }

        if self
            .largest_received
            .map_or(true, |largest| packet_number > largest)
        {
            self.largest_received = Some(packet_number);
            self.largest_received_time = Some(now);
        }

        self.ecn_counts.increment(ecn);

        if ack_elicitation.is_ack_eliciting() {
            self.unacked_eliciting += 1;

            //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
            //# An endpoint MUST acknowledge all ack-eliciting Initial and
            //# Handshake packets immediately
            let deadline = if self.space.is_application_data() {
                //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.2
                //# A receiver SHOULD send an ACK frame after receiving at
                //# least two ack-eliciting packets.
                if self.unacked_eliciting >= 2 {
                    now
                } else {
                    now + max_ack_delay
                }
            } else {
                now
            };
            self.ack_deadline = Some(self.ack_deadline.map_or(deadline, |d| d.min(deadline)));
        }

        true
    }

    /// Returns true if an ACK frame should be included in the next packet
    pub fn ack_pending(&self, now: Timestamp) -> bool {
        self.ack_deadline.map_or(false, |deadline| deadline <= now)
    }

    /// Returns true if any ack-eliciting packets await acknowledgment
    pub fn has_ack_interest(&self) -> bool {
        self.ack_deadline.is_some()
    }

    /// The deadline of the delayed-ack timer
    pub fn ack_deadline(&self) -> Option<Timestamp> {
        self.ack_deadline
    }

    /// Produces the contents for an ACK frame and clears the ack timer.
    ///
    /// Returns the ranges, the ack delay (time since the largest packet
    /// arrived) and the ECN counts to report.
    pub fn ack_contents(
        &mut self,
        now: Timestamp,
        report_ecn: bool,
    ) -> Option<(&ack::Ranges, Duration, Option<EcnCounts>)> {
        if self.received.is_empty() {
            return None;
        }

        self.ack_deadline = None;
        self.unacked_eliciting = 0;

        let delay = self
            .largest_received_time
            .map_or(Duration::ZERO, |time| now.saturating_duration_since(time));

        let counts = report_ecn.then_some(self.ecn_counts);

        Some((&self.received, delay, counts))
    }

    /// Discards this space's keys and state at its protocol milestone
    pub fn discard(&mut self, congestion_controller: &mut quell_quic_core::recovery::NewReno) {
        debug_assert!(!self.space.is_application_data());
        self.keys = SpaceKeys::None;
        self.received.clear();
        self.ack_deadline = None;
        self.recovery.discard(congestion_controller);
    }
}

//= https://www.rfc-editor.org/rfc/rfc9001#section-6
//# Once the handshake is confirmed, an endpoint MAY initiate a key
//# update.

/// 1-RTT keys with the key-update state machine
pub struct OneRttKeySet {
    phase: KeyPhase,
    local_secret: Secret,
    peer_secret: Secret,
    current: KeyPair,
    /// Lazily derived keys for the next generation, kept until a packet
    /// of the flipped phase authenticates
    next_opener: Option<(Secret, DirectionalKeys)>,
    /// Packets protected with the current sealing key
    sealed_packets: u64,
    /// Failed decryptions against this connection's 1-RTT keys
    decryption_failures: u64,
    /// The first packet number sent in the current generation; an ack at
    /// or above it permits the next locally initiated update
    first_sent_in_generation: Option<u64>,
    /// Set once a packet of the current generation has been acknowledged
    generation_acked: bool,
}

impl OneRttKeySet {
    fn new(local: Secret, peer: Secret) -> Self {
        let current = KeyPair::new(&local, &peer);
        Self {
            phase: KeyPhase::Zero,
            local_secret: local,
            peer_secret: peer,
            current,
            next_opener: None,
            sealed_packets: 0,
            decryption_failures: 0,
            first_sent_in_generation: None,
            generation_acked: false,
        }
    }

    #[inline]
    pub fn key_phase(&self) -> KeyPhase {
        self.phase
    }

    #[inline]
    pub fn opener(&self) -> &DirectionalKeys {
        &self.current.opener
    }

    #[inline]
    pub fn sealer(&self) -> &DirectionalKeys {
        &self.current.sealer
    }

    /// Records a sealed packet, enforcing the confidentiality limit
    //= https://www.rfc-editor.org/rfc/rfc9001#section-6.6
    //# If a key update is not possible or integrity limits are reached,
    //# the endpoint MUST stop using the connection
    pub fn on_packet_sealed(&mut self, packet_number: u64) -> Result<(), transport::Error> {
        use quell_quic_core::crypto::Key as _;

        self.sealed_packets += 1;
        self.first_sent_in_generation.get_or_insert(packet_number);

        if self.sealed_packets >= self.current.sealer.packet.aead_confidentiality_limit() {
            return Err(transport_error!(
                AEAD_LIMIT_REACHED,
                "confidentiality limit reached"
            ));
        }
        Ok(())
    }

    /// Marks the current generation acknowledged, unblocking further
    /// updates
    pub fn on_packet_acked(&mut self, packet_number: u64) {
        if self
            .first_sent_in_generation
            .map_or(false, |first| packet_number >= first)
        {
            self.generation_acked = true;
        }
    }

    /// Initiates a local key update if the handshake is confirmed and the
    /// previous generation has been acknowledged
    //= https://www.rfc-editor.org/rfc/rfc9001#section-6.1
    //# An endpoint MUST NOT initiate a subsequent key update unless it has
    //# received an acknowledgment for a packet that was sent protected with
    //# keys from the current key phase.
    pub fn initiate_key_update(&mut self) -> bool {
        if !self.generation_acked {
            return false;
        }
        self.advance_generation();
        true
    }

    /// Returns true when enough packets have been sealed that the key
    /// should be rotated before its confidentiality limit is reached
    pub fn update_advisable(&self) -> bool {
        use quell_quic_core::crypto::Key as _;
        let limit = self.current.sealer.packet.aead_confidentiality_limit();
        self.sealed_packets >= limit / 2
    }

    fn advance_generation(&mut self) {
        self.local_secret = self.local_secret.next_key_update();
        self.peer_secret = self.peer_secret.next_key_update();
        self.current = KeyPair::new(&self.local_secret, &self.peer_secret);
        self.next_opener = None;
        self.phase = self.phase.next();
        self.sealed_packets = 0;
        self.first_sent_in_generation = None;
        self.generation_acked = false;
    }

    /// Keys to try for a packet with a flipped key phase bit, derived
    /// lazily
    //= https://www.rfc-editor.org/rfc/rfc9001#section-6.3
    //# An endpoint can defer the creation of the next set of [...] keys
    //# until some packets cannot be decrypted with current keys.
    pub fn next_generation_opener(&mut self) -> &DirectionalKeys {
        if self.next_opener.is_none() {
            let next_secret = self.peer_secret.next_key_update();
            let opener = DirectionalKeys::new(&next_secret);
            self.next_opener = Some((next_secret, opener));
        }
        &self.next_opener.as_ref().expect("populated above").1
    }

    /// Commits to the next generation after a packet of the flipped phase
    /// authenticated
    //= https://www.rfc-editor.org/rfc/rfc9001#section-6.2
    //# An endpoint
    //# that receives a packet with a higher packet number protected with a
    //# different key phase value updates its keys
    pub fn on_peer_update_confirmed(&mut self) {
        if self.next_opener.take().is_some() {
            self.advance_generation();
        } else {
            debug_assert!(false, "commit without a derived next generation");
        }
    }

    /// Records a failed decryption, enforcing the integrity limit
    pub fn on_decryption_failure(&mut self) -> Result<(), transport::Error> {
        use quell_quic_core::crypto::Key as _;

        self.decryption_failures += 1;
        if self.decryption_failures >= self.current.opener.packet.aead_integrity_limit() {
            return Err(transport_error!(
                AEAD_LIMIT_REACHED,
                "integrity limit reached"
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quell_quic_core::crypto::CipherSuite;

    fn space() -> PacketSpace {
        PacketSpace::new(PacketNumberSpace::ApplicationData)
    }

    fn timestamp(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    fn receive(space: &mut PacketSpace, pn: u64, millis: u64) -> bool {
        let packet_number = space
            .space()
            .new_packet_number(VarInt::new(pn).unwrap());
        space.on_packet_received(
            packet_number,
            AckElicitation::Eliciting,
            ExplicitCongestionNotification::NotEct,
            timestamp(millis),
            Duration::from_millis(25),
        )
    }

    #[test]
    fn duplicate_rejection() {
        let mut space = space();
        assert!(receive(&mut space, 3, 1));
        assert!(!receive(&mut space, 3, 2));
        assert!(receive(&mut space, 7, 3));
    }

    #[test]
    fn ack_deadline_immediate_after_two_eliciting() {
        let mut space = space();
        receive(&mut space, 0, 0);
        // the first packet waits on max_ack_delay
        assert!(!space.ack_pending(timestamp(1)));
        assert!(space.ack_pending(timestamp(30)));

        receive(&mut space, 1, 1);
        // the second forces an immediate ack
        assert!(space.ack_pending(timestamp(1)));

        let (ranges, delay, _) = space.ack_contents(timestamp(5), false).unwrap();
        assert_eq!(ranges.max_value().unwrap().as_u64(), 1);
        assert_eq!(delay, Duration::from_millis(4));
        assert!(!space.ack_pending(timestamp(100)));
    }

    #[test]
    fn packet_number_allocation_is_monotone() {
        let mut space = space();
        let a = space.next_packet_number().unwrap();
        let b = space.next_packet_number().unwrap();
        assert!(b > a);
    }

    #[test]
    fn key_update_generation() {
        let secret = |byte: u8| Secret::new(CipherSuite::Aes128GcmSha256, &[byte; 32]);
        let mut keys = OneRttKeySet::new(secret(1), secret(2));
        assert_eq!(keys.key_phase(), KeyPhase::Zero);

        // an update is blocked before any packet of this generation is
        // acknowledged
        assert!(!keys.initiate_key_update());

        keys.on_packet_sealed(0).unwrap();
        keys.on_packet_acked(0);
        assert!(keys.initiate_key_update());
        assert_eq!(keys.key_phase(), KeyPhase::One);

        // and blocked again until the new generation sees an ack
        assert!(!keys.initiate_key_update());
    }

    #[test]
    fn peer_initiated_update_commits_lazily() {
        let secret = |byte: u8| Secret::new(CipherSuite::Aes128GcmSha256, &[byte; 32]);
        let mut keys = OneRttKeySet::new(secret(1), secret(2));

        let _ = keys.next_generation_opener();
        keys.on_peer_update_confirmed();
        assert_eq!(keys.key_phase(), KeyPhase::One);
    }
}
