// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Types and utilities around the QUIC Stream identifier

use crate::{endpoint, stream::StreamType, varint::VarInt};

/// The ID of a stream.
///
/// A stream ID is a 62-bit integer (0 to 2^62-1) that is unique for all
/// streams on a connection.
#[derive(PartialEq, Eq, PartialOrd, Ord, Debug, Copy, Clone, Hash)]
pub struct StreamId(VarInt);

impl From<StreamId> for VarInt {
    #[inline]
    fn from(id: StreamId) -> Self {
        id.0
    }
}

impl From<StreamId> for u64 {
    #[inline]
    fn from(id: StreamId) -> Self {
        id.0.as_u64()
    }
}

impl StreamId {
    /// Creates a Stream ID from a [`VarInt`].
    ///
    /// This is always a safe conversion, since Stream IDs and [`VarInt`]s
    /// share the same range.
    #[inline]
    pub const fn from_varint(id: VarInt) -> StreamId {
        StreamId(id)
    }

    /// Converts the stream id into a [`VarInt`]
    #[inline]
    pub const fn as_varint(self) -> VarInt {
        self.0
    }

    /// Returns the initial Stream ID for a given stream type, e.g. the
    /// initial server-initiated unidirectional Stream ID is `3`.
    #[inline]
    pub fn initial(initiator: endpoint::Type, stream_type: StreamType) -> StreamId {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-2.1
        //# The two least significant bits from a stream ID therefore identify a
        //# stream as one of four types, as summarized in Table 1.
        //#
        //#        +======+==================================+
        //#        | Bits | Stream Type                      |
        //#        +======+==================================+
        //#        | 0x00 | Client-Initiated, Bidirectional  |
        //#        +------+----------------------------------+
        //#        | 0x01 | Server-Initiated, Bidirectional  |
        //#        +------+----------------------------------+
        //#        | 0x02 | Client-Initiated, Unidirectional |
        //#        +------+----------------------------------+
        //#        | 0x03 | Server-Initiated, Unidirectional |
        //#        +------+----------------------------------+

        match (
            stream_type == StreamType::Bidirectional,
            initiator == endpoint::Type::Client,
        ) {
            (true, true) => StreamId(VarInt::from_u32(0)),
            (true, false) => StreamId(VarInt::from_u32(1)),
            (false, true) => StreamId(VarInt::from_u32(2)),
            (false, false) => StreamId(VarInt::from_u32(3)),
        }
    }

    /// Returns the n-th `StreamId` for a certain type of stream.
    ///
    /// The 0th `StreamId` is the one returned by [`Self::initial`]; stream
    /// ids of a given type are spaced apart by 4. Returns `None` if the
    /// resulting `StreamId` would not be valid.
    #[inline]
    pub fn nth(initiator: endpoint::Type, stream_type: StreamType, n: u64) -> Option<StreamId> {
        let initial = Self::initial(initiator, stream_type);
        let id = VarInt::new(n.checked_mul(4)?.checked_add(initial.into())?).ok()?;
        Some(StreamId(id))
    }

    /// Returns the index of this stream within its (initiator,
    /// directionality) class
    #[inline]
    pub fn as_nth(self) -> u64 {
        self.0.as_u64() / 4
    }

    /// Returns the next [`StreamId`] of the same type, or `None` when out of
    /// bounds
    #[inline]
    pub fn next_of_type(self) -> Option<StreamId> {
        // stream ids increase in steps of 4, since the 2 least significant
        // bits encode the stream type
        self.0
            .checked_add(VarInt::from_u32(4))
            .map(StreamId::from_varint)
    }

    /// Returns whether the client or server initiated the stream
    #[inline]
    pub fn initiator(self) -> endpoint::Type {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-2.1
        //# The least significant bit (0x1) of the stream ID identifies the
        //# initiator of the stream.  Client-initiated streams have even-numbered
        //# stream IDs (with the bit set to 0)
        if self.0.as_u64() & 0x01 == 0 {
            endpoint::Type::Client
        } else {
            endpoint::Type::Server
        }
    }

    /// Returns whether the stream is unidirectional or bidirectional
    #[inline]
    pub fn stream_type(self) -> StreamType {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-2.1
        //# The second least significant bit (0x2) of the stream ID
        //# distinguishes between bidirectional streams (with the bit set to 0)
        //# and unidirectional streams (with the bit set to 1).
        if self.0.as_u64() & 0x02 == 0 {
            StreamType::Bidirectional
        } else {
            StreamType::Unidirectional
        }
    }

    /// Returns true if the local endpoint of the given type may receive
    /// data on this stream
    #[inline]
    pub fn is_receivable_by(self, local: endpoint::Type) -> bool {
        self.stream_type().is_bidirectional() || self.initiator() != local
    }

    /// Returns true if the local endpoint of the given type may send data
    /// on this stream
    #[inline]
    pub fn is_sendable_by(self, local: endpoint::Type) -> bool {
        self.stream_type().is_bidirectional() || self.initiator() == local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_stream_ids() {
        for stream_type in [StreamType::Bidirectional, StreamType::Unidirectional] {
            for initiator in [endpoint::Type::Client, endpoint::Type::Server] {
                let id = StreamId::initial(initiator, stream_type);
                assert_eq!(stream_type, id.stream_type());
                assert_eq!(initiator, id.initiator());
            }
        }

        assert_eq!(
            3u64,
            StreamId::initial(endpoint::Type::Server, StreamType::Unidirectional).into()
        );
    }

    #[test]
    fn nth_round_trips_class() {
        for n in [0u64, 1, 7, 1000] {
            let id = StreamId::nth(endpoint::Type::Client, StreamType::Unidirectional, n).unwrap();
            assert_eq!(id.as_nth(), n);
            assert_eq!(id.initiator(), endpoint::Type::Client);
            assert_eq!(id.stream_type(), StreamType::Unidirectional);
        }
    }

    #[test]
    fn stream_id_overflow() {
        let max_stream_id_varint = VarInt::new((1 << 62) - 1).unwrap();
        let _max_stream_id = StreamId::from_varint(max_stream_id_varint);

        let max_increasable = StreamId::from_varint(max_stream_id_varint.saturating_sub(VarInt::from_u8(4)));
        assert!(max_increasable.next_of_type().is_some());

        // the base id is still valid but the increment is no longer
        for increment in 1..5u8 {
            let id_varint = max_stream_id_varint
                .saturating_sub(VarInt::from_u8(4))
                .saturating_add(VarInt::from_u8(increment));
            let stream_id = StreamId::from_varint(id_varint);
            assert!(stream_id.next_of_type().is_none());
        }
    }

    #[test]
    fn directionality_test() {
        // client-initiated unidirectional stream 2
        let id = StreamId::from_varint(VarInt::from_u8(2));
        assert!(id.is_sendable_by(endpoint::Type::Client));
        assert!(!id.is_sendable_by(endpoint::Type::Server));
        assert!(id.is_receivable_by(endpoint::Type::Server));
        assert!(!id.is_receivable_by(endpoint::Type::Client));

        // bidirectional streams flow both ways
        let id = StreamId::from_varint(VarInt::from_u8(0));
        assert!(id.is_sendable_by(endpoint::Type::Server));
        assert!(id.is_receivable_by(endpoint::Type::Client));
    }
}
