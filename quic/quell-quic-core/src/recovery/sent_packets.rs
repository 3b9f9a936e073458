// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    frame::ack_elicitation::AckElicitation,
    inet::ExplicitCongestionNotification,
    packet::number::{PacketNumber, PacketNumberSpace},
    time::Timestamp,
};
use alloc::collections::btree_map::BTreeMap;

//= https://www.rfc-editor.org/rfc/rfc9002#appendix-A.1.1
//# sent_packets is an association of packet numbers to information
//# about them.  [...] the size of the packet, and whether the packet
//# counts towards bytes in flight

/// Everything recorded about a packet when it is sent, generic over the
/// caller's retransmission payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentPacketInfo<Retransmit> {
    /// The number of bytes sent in the packet, not including UDP or IP
    /// overhead, but including QUIC framing overhead
    pub sent_bytes: u16,
    pub time_sent: Timestamp,
    pub ack_elicitation: AckElicitation,
    /// Whether the packet counts toward bytes in flight
    pub in_flight: bool,
    pub ecn: ExplicitCongestionNotification,
    /// State needed to reconstruct the packet's frames if it is lost
    pub retransmit: Retransmit,
}

/// The record of in-flight packets for one packet number space
#[derive(Clone, Debug, Default)]
pub struct SentPackets<Retransmit> {
    packets: BTreeMap<u64, SentPacketInfo<Retransmit>>,
}

impl<Retransmit> SentPackets<Retransmit> {
    pub fn new() -> Self {
        Self {
            packets: BTreeMap::new(),
        }
    }

    /// Records a sent packet.
    ///
    /// Packet numbers are strictly monotone per space, so an insert never
    /// replaces an existing record.
    pub fn insert(&mut self, packet_number: PacketNumber, info: SentPacketInfo<Retransmit>) {
        let prior = self.packets.insert(packet_number.as_u64(), info);
        debug_assert!(prior.is_none(), "packet number reused: {packet_number:?}");
    }

    /// Removes and returns the record for an acknowledged or lost packet
    pub fn remove(&mut self, packet_number: PacketNumber) -> Option<SentPacketInfo<Retransmit>> {
        self.packets.remove(&packet_number.as_u64())
    }

    pub fn get(&self, packet_number: PacketNumber) -> Option<&SentPacketInfo<Retransmit>> {
        self.packets.get(&packet_number.as_u64())
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Iterates records in packet number order
    pub fn iter(
        &self,
        space: PacketNumberSpace,
    ) -> impl Iterator<Item = (PacketNumber, &SentPacketInfo<Retransmit>)> {
        self.packets.iter().map(move |(&pn, info)| {
            // Safety: inserted from PacketNumber values
            let pn = unsafe { crate::varint::VarInt::new_unchecked(pn) };
            (space.new_packet_number(pn), info)
        })
    }

    /// The earliest send time among ack-eliciting in-flight packets
    pub fn earliest_ack_eliciting_time(&self) -> Option<Timestamp> {
        self.packets
            .values()
            .filter(|info| info.ack_elicitation.is_ack_eliciting() && info.in_flight)
            .map(|info| info.time_sent)
            .min()
    }

    /// Returns true if any ack-eliciting packet remains in flight
    pub fn has_ack_eliciting_in_flight(&self) -> bool {
        self.packets
            .values()
            .any(|info| info.ack_elicitation.is_ack_eliciting() && info.in_flight)
    }

    /// Removes and returns every record within the inclusive packet number
    /// range, in ascending order
    pub fn remove_range(
        &mut self,
        space: PacketNumberSpace,
        start: u64,
        end: u64,
    ) -> alloc::vec::Vec<(PacketNumber, SentPacketInfo<Retransmit>)> {
        let keys: alloc::vec::Vec<u64> = self.packets.range(start..=end).map(|(&pn, _)| pn).collect();
        keys.into_iter()
            .map(|pn| {
                let info = self.packets.remove(&pn).expect("key was just observed");
                // Safety: inserted from PacketNumber values
                let pn = unsafe { crate::varint::VarInt::new_unchecked(pn) };
                (space.new_packet_number(pn), info)
            })
            .collect()
    }

    /// Drains every record, e.g. when the space is discarded
    pub fn drain(&mut self) -> impl Iterator<Item = SentPacketInfo<Retransmit>> {
        core::mem::take(&mut self.packets).into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{time::Duration, varint::VarInt};

    fn info(millis: u64) -> SentPacketInfo<()> {
        SentPacketInfo {
            sent_bytes: 1200,
            time_sent: Timestamp::from_duration(Duration::from_millis(millis)),
            ack_elicitation: AckElicitation::Eliciting,
            in_flight: true,
            ecn: ExplicitCongestionNotification::NotEct,
            retransmit: (),
        }
    }

    #[test]
    fn insert_remove_test() {
        let space = PacketNumberSpace::ApplicationData;
        let mut sent = SentPackets::new();

        for pn in 0..5u8 {
            sent.insert(space.new_packet_number(VarInt::from_u8(pn)), info(pn as u64));
        }
        assert_eq!(sent.len(), 5);

        let removed = sent.remove(space.new_packet_number(VarInt::from_u8(3)));
        assert!(removed.is_some());
        assert!(sent.remove(space.new_packet_number(VarInt::from_u8(3))).is_none());
        assert_eq!(sent.len(), 4);

        assert_eq!(
            sent.earliest_ack_eliciting_time(),
            Some(Timestamp::from_duration(Duration::from_millis(0)))
        );
    }
}
