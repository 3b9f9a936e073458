// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! QUIC frame codecs
//!
//! Frames are modeled as a closed tagged variant: decoding returns a
//! `Frame`, encoding is a direct function of it. Each frame type lives in
//! its own module together with its wire grammar.

#![forbid(unsafe_code)]

use quell_codec::{DecoderBuffer, DecoderBufferResult, DecoderError, Encoder, EncoderValue};

pub mod ack_elicitation;

pub(crate) type Tag = u8;

//= https://www.rfc-editor.org/rfc/rfc9000#section-12.4
//# The Frame Type field uses a variable-length integer encoding, with one
//# exception.  To ensure simple and efficient implementations of frame
//# parsing, a frame type MUST use the shortest possible encoding.

// All frame types implemented by this crate fit in a single-byte varint.
const MAX_SINGLE_BYTE_TAG: u8 = 0b0011_1111;

pub mod ack;
pub mod connection_close;
pub mod crypto;
pub mod data_blocked;
pub mod datagram;
pub mod handshake_done;
pub mod max_data;
pub mod max_stream_data;
pub mod max_streams;
pub mod new_connection_id;
pub mod new_token;
pub mod padding;
pub mod path_challenge;
pub mod path_response;
pub mod ping;
pub mod reset_stream;
pub mod retire_connection_id;
pub mod stop_sending;
pub mod stream;
pub mod stream_data_blocked;
pub mod streams_blocked;

pub use ack::Ack;
pub use connection_close::ConnectionClose;
pub use crypto::Crypto;
pub use data_blocked::DataBlocked;
pub use datagram::Datagram;
pub use handshake_done::HandshakeDone;
pub use max_data::MaxData;
pub use max_stream_data::MaxStreamData;
pub use max_streams::MaxStreams;
pub use new_connection_id::NewConnectionId;
pub use new_token::NewToken;
pub use padding::Padding;
pub use path_challenge::PathChallenge;
pub use path_response::PathResponse;
pub use ping::Ping;
pub use reset_stream::ResetStream;
pub use retire_connection_id::RetireConnectionId;
pub use stop_sending::StopSending;
pub use stream::Stream;
pub use stream_data_blocked::StreamDataBlocked;
pub use streams_blocked::StreamsBlocked;

pub use ack_elicitation::{AckElicitable, AckElicitation};

/// A decoded frame borrowing its payload from the packet buffer
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    Padding(Padding),
    Ping(Ping),
    Ack(Ack<ack::AckRangesDecoder<'a>>),
    ResetStream(ResetStream),
    StopSending(StopSending),
    Crypto(Crypto<&'a [u8]>),
    NewToken(NewToken<'a>),
    Stream(Stream<&'a [u8]>),
    MaxData(MaxData),
    MaxStreamData(MaxStreamData),
    MaxStreams(MaxStreams),
    DataBlocked(DataBlocked),
    StreamDataBlocked(StreamDataBlocked),
    StreamsBlocked(StreamsBlocked),
    NewConnectionId(NewConnectionId),
    RetireConnectionId(RetireConnectionId),
    PathChallenge(PathChallenge),
    PathResponse(PathResponse),
    ConnectionClose(ConnectionClose<'a>),
    HandshakeDone(HandshakeDone),
    Datagram(Datagram<&'a [u8]>),
}

impl<'a> Frame<'a> {
    /// Decodes a single frame from the front of `buffer`
    pub fn decode(buffer: DecoderBuffer<'a>) -> DecoderBufferResult<'a, Self> {
        let tag = buffer.peek_byte(0)?;

        if tag > MAX_SINGLE_BYTE_TAG {
            return Err(DecoderError::InvariantViolation("invalid frame"));
        }

        let buffer = buffer.skip(core::mem::size_of::<Tag>())?;

        macro_rules! decode {
            ($variant:ident) => {{
                let (frame, buffer) = buffer.decode_parameterized(tag)?;
                Ok((Frame::$variant(frame), buffer))
            }};
        }

        match tag {
            padding::TAG => decode!(Padding),
            ping::TAG => decode!(Ping),
            ack::tag!() => decode!(Ack),
            reset_stream::TAG => decode!(ResetStream),
            stop_sending::TAG => decode!(StopSending),
            crypto::TAG => decode!(Crypto),
            new_token::TAG => decode!(NewToken),
            stream::tag!() => decode!(Stream),
            max_data::TAG => decode!(MaxData),
            max_stream_data::TAG => decode!(MaxStreamData),
            max_streams::tag!() => decode!(MaxStreams),
            data_blocked::TAG => decode!(DataBlocked),
            stream_data_blocked::TAG => decode!(StreamDataBlocked),
            streams_blocked::tag!() => decode!(StreamsBlocked),
            new_connection_id::TAG => decode!(NewConnectionId),
            retire_connection_id::TAG => decode!(RetireConnectionId),
            path_challenge::TAG => decode!(PathChallenge),
            path_response::TAG => decode!(PathResponse),
            connection_close::tag!() => decode!(ConnectionClose),
            handshake_done::TAG => decode!(HandshakeDone),
            datagram::tag!() => decode!(Datagram),
            _ => Err(DecoderError::InvariantViolation("invalid frame")),
        }
    }

    /// Returns the wire tag of the frame
    pub fn tag(&self) -> Tag {
        match self {
            Frame::Padding(f) => f.tag(),
            Frame::Ping(f) => f.tag(),
            Frame::Ack(f) => f.tag(),
            Frame::ResetStream(f) => f.tag(),
            Frame::StopSending(f) => f.tag(),
            Frame::Crypto(f) => f.tag(),
            Frame::NewToken(f) => f.tag(),
            Frame::Stream(f) => f.tag(),
            Frame::MaxData(f) => f.tag(),
            Frame::MaxStreamData(f) => f.tag(),
            Frame::MaxStreams(f) => f.tag(),
            Frame::DataBlocked(f) => f.tag(),
            Frame::StreamDataBlocked(f) => f.tag(),
            Frame::StreamsBlocked(f) => f.tag(),
            Frame::NewConnectionId(f) => f.tag(),
            Frame::RetireConnectionId(f) => f.tag(),
            Frame::PathChallenge(f) => f.tag(),
            Frame::PathResponse(f) => f.tag(),
            Frame::ConnectionClose(f) => f.tag(),
            Frame::HandshakeDone(f) => f.tag(),
            Frame::Datagram(f) => f.tag(),
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-12.4
    //# The table also lists the packet types that each frame type could
    //# appear in, indicated by the following characters: [...]
    /// Returns true if the frame may appear at the given packet space
    ///
    /// `initial_or_handshake` selects the IH column of the frame table;
    /// everything else is governed by the 0-RTT/1-RTT columns which this
    /// crate collapses into "application".
    pub fn is_allowed_in_initial_or_handshake(&self) -> bool {
        matches!(
            self,
            Frame::Padding(_)
                | Frame::Ping(_)
                | Frame::Ack(_)
                | Frame::Crypto(_)
                | Frame::ConnectionClose(ConnectionClose {
                    frame_type: Some(_),
                    ..
                })
        )
    }

    /// Returns true if the frame may appear in a 0-RTT packet
    pub fn is_allowed_in_zero_rtt(&self) -> bool {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-12.5
        //# Note that it is not possible to send the following frames in 0-RTT
        //# packets for various reasons: ACK, CRYPTO, HANDSHAKE_DONE, NEW_TOKEN,
        //# PATH_RESPONSE, and RETIRE_CONNECTION_ID.
        !matches!(
            self,
            Frame::Ack(_)
                | Frame::Crypto(_)
                | Frame::HandshakeDone(_)
                | Frame::NewToken(_)
                | Frame::PathResponse(_)
                | Frame::RetireConnectionId(_)
        )
    }
}

impl<'a> AckElicitable for Frame<'a> {
    fn ack_elicitation(&self) -> AckElicitation {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-13.2.1
        //# all frames other than ACK, PADDING, and CONNECTION_CLOSE are
        //# considered ack-eliciting.
        match self {
            Frame::Padding(_) | Frame::Ack(_) | Frame::ConnectionClose(_) => {
                AckElicitation::NonEliciting
            }
            _ => AckElicitation::Eliciting,
        }
    }
}

/// Iterates over every frame in a packet payload
pub struct FrameIter<'a> {
    buffer: DecoderBuffer<'a>,
}

impl<'a> FrameIter<'a> {
    pub fn new(buffer: DecoderBuffer<'a>) -> Self {
        Self { buffer }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<Frame<'a>, DecoderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() {
            return None;
        }
        match Frame::decode(self.buffer) {
            Ok((frame, remaining)) => {
                self.buffer = remaining;
                Some(Ok(frame))
            }
            Err(err) => {
                // terminate iteration on the first malformed frame
                self.buffer = DecoderBuffer::new(&[]);
                Some(Err(err))
            }
        }
    }
}

/// Returned when a frame does not fit in the remaining packet capacity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FitError;

// This implements a codec for a frame that contains simple varint values
// that don't vary based on the tag
macro_rules! simple_frame_codec {
    ($name:ident {
        $(
            $field:ident
        ),*
    }, $tag:expr) => {
        quell_codec::decoder_parameterized_value!(
            impl<'a> $name {
                fn decode(_tag: crate::frame::Tag, buffer: Buffer) -> Result<Self> {
                    $(
                        let ($field, buffer) = buffer.decode()?;
                    )*

                    let frame = $name { $($field),* };

                    Ok((frame, buffer))
                }
            }
        );

        impl quell_codec::EncoderValue for $name {
            #[inline]
            fn encode<E: quell_codec::Encoder>(&self, buffer: &mut E) {
                buffer.encode(&$tag);
                $(
                    buffer.encode(&self.$field);
                )*
            }
        }
    };
}

pub(crate) use simple_frame_codec;

impl<'a> EncoderValue for Frame<'a> {
    fn encode<E: Encoder>(&self, buffer: &mut E) {
        match self {
            Frame::Padding(f) => buffer.encode(f),
            Frame::Ping(f) => buffer.encode(f),
            Frame::Ack(f) => buffer.encode(f),
            Frame::ResetStream(f) => buffer.encode(f),
            Frame::StopSending(f) => buffer.encode(f),
            Frame::Crypto(f) => buffer.encode(f),
            Frame::NewToken(f) => buffer.encode(f),
            Frame::Stream(f) => buffer.encode(f),
            Frame::MaxData(f) => buffer.encode(f),
            Frame::MaxStreamData(f) => buffer.encode(f),
            Frame::MaxStreams(f) => buffer.encode(f),
            Frame::DataBlocked(f) => buffer.encode(f),
            Frame::StreamDataBlocked(f) => buffer.encode(f),
            Frame::StreamsBlocked(f) => buffer.encode(f),
            Frame::NewConnectionId(f) => buffer.encode(f),
            Frame::RetireConnectionId(f) => buffer.encode(f),
            Frame::PathChallenge(f) => buffer.encode(f),
            Frame::PathResponse(f) => buffer.encode(f),
            Frame::ConnectionClose(f) => buffer.encode(f),
            Frame::HandshakeDone(f) => buffer.encode(f),
            Frame::Datagram(f) => buffer.encode(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::varint::VarInt;
    use quell_codec::EncoderBuffer;

    #[test]
    fn round_trip_simple_frames() {
        let frames: &[Frame] = &[
            Frame::Ping(Ping),
            Frame::MaxData(MaxData {
                maximum_data: VarInt::from_u32(1024),
            }),
            Frame::HandshakeDone(HandshakeDone),
            Frame::DataBlocked(DataBlocked {
                data_limit: VarInt::from_u32(2048),
            }),
        ];

        for frame in frames {
            let mut buffer = [0u8; 64];
            let len = {
                let mut encoder = EncoderBuffer::new(&mut buffer);
                encoder.encode(frame);
                encoder.len()
            };
            let (decoded, remaining) = Frame::decode(DecoderBuffer::new(&buffer[..len])).unwrap();
            assert!(remaining.is_empty());
            assert_eq!(&decoded, frame);
        }
    }

    #[test]
    fn unknown_frame_tag_test() {
        // 0x40 requires a multi-byte tag and is not a known frame
        let buffer = DecoderBuffer::new(&[0x40, 0x00]);
        assert!(Frame::decode(buffer).is_err());
    }
}
