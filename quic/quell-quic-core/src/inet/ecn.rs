// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::varint::VarInt;

//= https://www.rfc-editor.org/rfc/rfc9000#section-13.4
//# The use of ECN requires the receiving endpoint to read the ECN field
//# from an IP packet, which is not possible on all platforms.

/// The two-bit ECN codepoint from the IP header
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExplicitCongestionNotification {
    /// The not-ECT codepoint '00'
    #[default]
    NotEct = 0b00,
    /// The ECT(1) codepoint '01'
    Ect1 = 0b01,
    /// The ECT(0) codepoint '10'
    Ect0 = 0b10,
    /// The CE codepoint '11'
    Ce = 0b11,
}

impl ExplicitCongestionNotification {
    #[inline]
    pub fn new(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::NotEct,
            0b01 => Self::Ect1,
            0b10 => Self::Ect0,
            0b11 => Self::Ce,
            _ => unreachable!(),
        }
    }

    /// Returns true if the packet experienced congestion
    #[inline]
    pub fn congestion_experienced(self) -> bool {
        matches!(self, Self::Ce)
    }

    /// Returns true if the sender marked the packet ECN-capable
    #[inline]
    pub fn using_ecn(self) -> bool {
        !matches!(self, Self::NotEct)
    }
}

/// Counts of ECN codepoints observed in a packet number space
//= https://www.rfc-editor.org/rfc/rfc9000#section-19.3.2
//# ECN counts are maintained separately for each packet number space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EcnCounts {
    /// A count of packets that received the ECT(0) codepoint
    pub ect_0_count: VarInt,
    /// A count of packets that received the ECT(1) codepoint
    pub ect_1_count: VarInt,
    /// A count of packets that received the CE codepoint
    pub ce_count: VarInt,
}

impl EcnCounts {
    /// Increments the count for the given codepoint
    #[inline]
    pub fn increment(&mut self, ecn: ExplicitCongestionNotification) {
        match ecn {
            ExplicitCongestionNotification::Ect0 => {
                self.ect_0_count = self.ect_0_count.saturating_add(VarInt::from_u8(1))
            }
            ExplicitCongestionNotification::Ect1 => {
                self.ect_1_count = self.ect_1_count.saturating_add(VarInt::from_u8(1))
            }
            ExplicitCongestionNotification::Ce => {
                self.ce_count = self.ce_count.saturating_add(VarInt::from_u8(1))
            }
            ExplicitCongestionNotification::NotEct => {}
        }
    }

    /// Returns the counts as (ECT(0), ECT(1), CE)
    ///
    /// A count in a newly received ACK frame that is smaller than a
    /// previously reported one is a protocol violation; callers compare
    /// with `is_monotonic_increase_from`.
    #[inline]
    pub fn is_monotonic_increase_from(&self, baseline: &Self) -> bool {
        self.ect_0_count >= baseline.ect_0_count
            && self.ect_1_count >= baseline.ect_1_count
            && self.ce_count >= baseline.ce_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codepoint_round_trip() {
        for bits in 0..4u8 {
            let ecn = ExplicitCongestionNotification::new(bits);
            assert_eq!(ecn as u8, bits);
        }
    }

    #[test]
    fn monotonic_check() {
        let mut counts = EcnCounts::default();
        counts.increment(ExplicitCongestionNotification::Ect0);
        counts.increment(ExplicitCongestionNotification::Ce);

        let mut larger = counts;
        larger.increment(ExplicitCongestionNotification::Ect0);
        assert!(larger.is_monotonic_increase_from(&counts));
        assert!(!counts.is_monotonic_increase_from(&larger));
    }
}
