// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{
    connection::{ConnectionId, StatelessResetToken},
    endpoint,
    time::Duration,
    transport::Error,
    varint::VarInt,
};
use quell_codec::{DecoderBuffer, Encoder, EncoderBuffer, EncoderValue};

use alloc::vec::Vec;

//= https://www.rfc-editor.org/rfc/rfc9000#section-7.4
//# During connection establishment, both endpoints make authenticated
//# declarations of their transport parameters.  Endpoints are required
//# to comply with the restrictions that each parameter defines; the
//# description of each parameter includes rules for its handling.

//= https://www.rfc-editor.org/rfc/rfc9000#section-18
//# The extension_data field of the quic_transport_parameters extension
//# defined in [QUIC-TLS] contains the QUIC transport parameters.  They
//# are encoded as a sequence of transport parameters, as shown in
//# Figure 20.
//#
//# Transport Parameters {
//#   Transport Parameter (..) ...,
//# }

mod id {
    pub const ORIGINAL_DESTINATION_CONNECTION_ID: u64 = 0x00;
    pub const MAX_IDLE_TIMEOUT: u64 = 0x01;
    pub const STATELESS_RESET_TOKEN: u64 = 0x02;
    pub const MAX_UDP_PAYLOAD_SIZE: u64 = 0x03;
    pub const INITIAL_MAX_DATA: u64 = 0x04;
    pub const INITIAL_MAX_STREAM_DATA_BIDI_LOCAL: u64 = 0x05;
    pub const INITIAL_MAX_STREAM_DATA_BIDI_REMOTE: u64 = 0x06;
    pub const INITIAL_MAX_STREAM_DATA_UNI: u64 = 0x07;
    pub const INITIAL_MAX_STREAMS_BIDI: u64 = 0x08;
    pub const INITIAL_MAX_STREAMS_UNI: u64 = 0x09;
    pub const ACK_DELAY_EXPONENT: u64 = 0x0a;
    pub const MAX_ACK_DELAY: u64 = 0x0b;
    pub const DISABLE_ACTIVE_MIGRATION: u64 = 0x0c;
    pub const PREFERRED_ADDRESS: u64 = 0x0d;
    pub const ACTIVE_CONNECTION_ID_LIMIT: u64 = 0x0e;
    pub const INITIAL_SOURCE_CONNECTION_ID: u64 = 0x0f;
    pub const RETRY_SOURCE_CONNECTION_ID: u64 = 0x10;
    pub const MAX_DATAGRAM_FRAME_SIZE: u64 = 0x20;
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-18.1
//# Transport parameters with an identifier of the form "31 * N + 27" for
//# integer values of N are reserved to exercise the requirement that
//# unknown transport parameters be ignored.
#[inline]
fn is_reserved(id: u64) -> bool {
    id >= 27 && (id - 27) % 31 == 0
}

// identifiers above this point are available for private extension use and
// are skipped rather than rejected
const PRIVATE_USE_START: u64 = 0xff00;

/// The transport parameters declared by one endpoint
///
/// The values received from the peer bind what we may send; the values we
/// declare bind what the peer may send.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportParameters {
    pub original_destination_connection_id: Option<ConnectionId>,
    pub max_idle_timeout: VarInt,
    pub stateless_reset_token: Option<StatelessResetToken>,
    pub max_udp_payload_size: VarInt,
    pub initial_max_data: VarInt,
    pub initial_max_stream_data_bidi_local: VarInt,
    pub initial_max_stream_data_bidi_remote: VarInt,
    pub initial_max_stream_data_uni: VarInt,
    pub initial_max_streams_bidi: VarInt,
    pub initial_max_streams_uni: VarInt,
    pub ack_delay_exponent: u8,
    pub max_ack_delay: VarInt,
    pub disable_active_migration: bool,
    /// Retained as an opaque blob; migration to a preferred address is out
    /// of the transport core's scope
    pub preferred_address: Option<Vec<u8>>,
    pub active_connection_id_limit: VarInt,
    pub initial_source_connection_id: Option<ConnectionId>,
    pub retry_source_connection_id: Option<ConnectionId>,
    /// Non-zero when DATAGRAM frames are accepted
    pub max_datagram_frame_size: VarInt,
}

impl Default for TransportParameters {
    fn default() -> Self {
        Self {
            original_destination_connection_id: None,
            max_idle_timeout: VarInt::ZERO,
            stateless_reset_token: None,
            //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
            //# The default for this parameter is the maximum permitted UDP
            //# payload of 65527.
            max_udp_payload_size: VarInt::from_u16(65527),
            initial_max_data: VarInt::ZERO,
            initial_max_stream_data_bidi_local: VarInt::ZERO,
            initial_max_stream_data_bidi_remote: VarInt::ZERO,
            initial_max_stream_data_uni: VarInt::ZERO,
            initial_max_streams_bidi: VarInt::ZERO,
            initial_max_streams_uni: VarInt::ZERO,
            //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
            //# If this value is absent, a default value of 3 is assumed.
            ack_delay_exponent: 3,
            //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
            //# If this value is absent, a default of 25 milliseconds is assumed.
            max_ack_delay: VarInt::from_u8(25),
            disable_active_migration: false,
            preferred_address: None,
            //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
            //# If this transport parameter is absent, a default of 2 is assumed.
            active_connection_id_limit: VarInt::from_u8(2),
            initial_source_connection_id: None,
            retry_source_connection_id: None,
            max_datagram_frame_size: VarInt::ZERO,
        }
    }
}

impl TransportParameters {
    /// Returns the peer's max_ack_delay as a `Duration`
    #[inline]
    pub fn max_ack_delay(&self) -> Duration {
        Duration::from_millis(self.max_ack_delay.as_u64())
    }

    /// Returns the peer's max_idle_timeout, `None` when idle timeout is
    /// disabled
    #[inline]
    pub fn max_idle_timeout(&self) -> Option<Duration> {
        if self.max_idle_timeout == VarInt::ZERO {
            None
        } else {
            Some(Duration::from_millis(self.max_idle_timeout.as_u64()))
        }
    }

    /// Decodes and validates parameters declared by an endpoint of type
    /// `sender`
    pub fn decode(buffer: DecoderBuffer, sender: endpoint::Type) -> Result<Self, Error> {
        let mut parameters = Self::default();
        let mut seen = [false; 0x21];
        let mut buffer = buffer;

        macro_rules! tp_error {
            ($reason:expr) => {
                transport_error!(TRANSPORT_PARAMETER_ERROR, $reason)
            };
        }

        while !buffer.is_empty() {
            let (id, remaining) = buffer
                .decode::<VarInt>()
                .map_err(|_| tp_error!("malformed parameter id"))?;
            let (value, remaining) = remaining
                .decode_slice_with_len_prefix::<VarInt>()
                .map_err(|_| tp_error!("malformed parameter length"))?;
            buffer = remaining;

            let id = id.as_u64();

            //= https://www.rfc-editor.org/rfc/rfc9000#section-7.4
            //# An endpoint MUST treat receipt of duplicate transport parameters
            //# as a connection error of type TRANSPORT_PARAMETER_ERROR.
            if let Some(entry) = seen.get_mut(id as usize) {
                if core::mem::replace(entry, true) {
                    return Err(tp_error!("duplicate transport parameter"));
                }
            }

            macro_rules! varint_value {
                () => {{
                    let (value, remaining) = value
                        .decode::<VarInt>()
                        .map_err(|_| tp_error!("malformed parameter value"))?;
                    remaining
                        .ensure_empty()
                        .map_err(|_| tp_error!("malformed parameter value"))?;
                    value
                }};
            }

            macro_rules! cid_value {
                () => {{
                    ConnectionId::try_from_slice(value.into_less_safe_slice())
                        .map_err(|_| tp_error!("invalid connection id"))?
                }};
            }

            //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
            //# A client MUST NOT include any server-only transport parameter:
            //# original_destination_connection_id, preferred_address,
            //# retry_source_connection_id, or stateless_reset_token.
            let server_only = matches!(
                id,
                id::ORIGINAL_DESTINATION_CONNECTION_ID
                    | id::PREFERRED_ADDRESS
                    | id::RETRY_SOURCE_CONNECTION_ID
                    | id::STATELESS_RESET_TOKEN
            );
            if server_only && sender.is_client() {
                return Err(tp_error!("server-only parameter sent by client"));
            }

            match id {
                id::ORIGINAL_DESTINATION_CONNECTION_ID => {
                    parameters.original_destination_connection_id = Some(cid_value!());
                }
                id::MAX_IDLE_TIMEOUT => parameters.max_idle_timeout = varint_value!(),
                id::STATELESS_RESET_TOKEN => {
                    let (token, remaining) = value
                        .decode::<StatelessResetToken>()
                        .map_err(|_| tp_error!("malformed stateless reset token"))?;
                    remaining
                        .ensure_empty()
                        .map_err(|_| tp_error!("malformed stateless reset token"))?;
                    parameters.stateless_reset_token = Some(token);
                }
                id::MAX_UDP_PAYLOAD_SIZE => {
                    let value = varint_value!();
                    //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
                    //# Values below 1200 are invalid.
                    if value < 1200u64 || value > 65527u64 {
                        return Err(tp_error!("max_udp_payload_size out of bounds"));
                    }
                    parameters.max_udp_payload_size = value;
                }
                id::INITIAL_MAX_DATA => parameters.initial_max_data = varint_value!(),
                id::INITIAL_MAX_STREAM_DATA_BIDI_LOCAL => {
                    parameters.initial_max_stream_data_bidi_local = varint_value!()
                }
                id::INITIAL_MAX_STREAM_DATA_BIDI_REMOTE => {
                    parameters.initial_max_stream_data_bidi_remote = varint_value!()
                }
                id::INITIAL_MAX_STREAM_DATA_UNI => {
                    parameters.initial_max_stream_data_uni = varint_value!()
                }
                id::INITIAL_MAX_STREAMS_BIDI => {
                    parameters.initial_max_streams_bidi = varint_value!()
                }
                id::INITIAL_MAX_STREAMS_UNI => {
                    parameters.initial_max_streams_uni = varint_value!()
                }
                id::ACK_DELAY_EXPONENT => {
                    let value = varint_value!();
                    //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
                    //# Values above 20 are invalid.
                    if value > 20u64 {
                        return Err(tp_error!("ack_delay_exponent out of bounds"));
                    }
                    parameters.ack_delay_exponent = value.as_u64() as u8;
                }
                id::MAX_ACK_DELAY => {
                    let value = varint_value!();
                    //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
                    //# Values of 2^14 or greater are invalid.
                    if value >= (1u64 << 14) {
                        return Err(tp_error!("max_ack_delay out of bounds"));
                    }
                    parameters.max_ack_delay = value;
                }
                id::DISABLE_ACTIVE_MIGRATION => {
                    //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
                    //# This parameter is a zero-length value.
                    value
                        .ensure_empty()
                        .map_err(|_| tp_error!("disable_active_migration carries a value"))?;
                    parameters.disable_active_migration = true;
                }
                id::PREFERRED_ADDRESS => {
                    {
                        parameters.preferred_address =
                            Some(value.into_less_safe_slice().to_vec());
                    }
                }
                id::ACTIVE_CONNECTION_ID_LIMIT => {
                    let value = varint_value!();
                    //= https://www.rfc-editor.org/rfc/rfc9000#section-18.2
                    //# The value of the active_connection_id_limit parameter MUST
                    //# be at least 2.
                    if value < 2u64 {
                        return Err(tp_error!("active_connection_id_limit below 2"));
                    }
                    parameters.active_connection_id_limit = value;
                }
                id::INITIAL_SOURCE_CONNECTION_ID => {
                    parameters.initial_source_connection_id = Some(cid_value!());
                }
                id::RETRY_SOURCE_CONNECTION_ID => {
                    parameters.retry_source_connection_id = Some(cid_value!());
                }
                id::MAX_DATAGRAM_FRAME_SIZE => {
                    parameters.max_datagram_frame_size = varint_value!();
                }
                id if is_reserved(id) || id >= PRIVATE_USE_START => {
                    // ignored: reserved to exercise the unknown-parameter
                    // requirement, or private extension space
                }
                _ => {
                    return Err(tp_error!("unknown transport parameter"));
                }
            }
        }

        Ok(parameters)
    }

    /// Encodes the parameters an endpoint of type `sender` declares
    pub fn encode(&self, sender: endpoint::Type, encoder: &mut EncoderBuffer) {
        fn put_varint(encoder: &mut EncoderBuffer, id: u64, value: VarInt) {
            VarInt::new(id).unwrap().encode(encoder);
            encoder.encode_with_len_prefix::<VarInt, _>(&value);
        }

        fn put_cid(encoder: &mut EncoderBuffer, id: u64, cid: &ConnectionId) {
            VarInt::new(id).unwrap().encode(encoder);
            VarInt::try_from(cid.len()).unwrap().encode(encoder);
            encoder.write_slice(cid.as_slice());
        }

        if let Some(cid) = &self.original_destination_connection_id {
            debug_assert!(sender.is_server());
            put_cid(encoder, id::ORIGINAL_DESTINATION_CONNECTION_ID, cid);
        }
        if self.max_idle_timeout != VarInt::ZERO {
            put_varint(encoder, id::MAX_IDLE_TIMEOUT, self.max_idle_timeout);
        }
        if let Some(token) = &self.stateless_reset_token {
            debug_assert!(sender.is_server());
            VarInt::new(id::STATELESS_RESET_TOKEN).unwrap().encode(encoder);
            VarInt::from_u8(16).encode(encoder);
            encoder.write_slice(token.as_slice());
        }
        put_varint(encoder, id::MAX_UDP_PAYLOAD_SIZE, self.max_udp_payload_size);
        put_varint(encoder, id::INITIAL_MAX_DATA, self.initial_max_data);
        put_varint(
            encoder,
            id::INITIAL_MAX_STREAM_DATA_BIDI_LOCAL,
            self.initial_max_stream_data_bidi_local,
        );
        put_varint(
            encoder,
            id::INITIAL_MAX_STREAM_DATA_BIDI_REMOTE,
            self.initial_max_stream_data_bidi_remote,
        );
        put_varint(
            encoder,
            id::INITIAL_MAX_STREAM_DATA_UNI,
            self.initial_max_stream_data_uni,
        );
        put_varint(
            encoder,
            id::INITIAL_MAX_STREAMS_BIDI,
            self.initial_max_streams_bidi,
        );
        put_varint(
            encoder,
            id::INITIAL_MAX_STREAMS_UNI,
            self.initial_max_streams_uni,
        );
        put_varint(
            encoder,
            id::ACK_DELAY_EXPONENT,
            VarInt::from_u8(self.ack_delay_exponent),
        );
        put_varint(encoder, id::MAX_ACK_DELAY, self.max_ack_delay);
        if self.disable_active_migration {
            VarInt::new(id::DISABLE_ACTIVE_MIGRATION).unwrap().encode(encoder);
            VarInt::ZERO.encode(encoder);
        }
        put_varint(
            encoder,
            id::ACTIVE_CONNECTION_ID_LIMIT,
            self.active_connection_id_limit,
        );
        if let Some(cid) = &self.initial_source_connection_id {
            put_cid(encoder, id::INITIAL_SOURCE_CONNECTION_ID, cid);
        }
        if let Some(cid) = &self.retry_source_connection_id {
            debug_assert!(sender.is_server());
            put_cid(encoder, id::RETRY_SOURCE_CONNECTION_ID, cid);
        }
        if self.max_datagram_frame_size != VarInt::ZERO {
            put_varint(
                encoder,
                id::MAX_DATAGRAM_FRAME_SIZE,
                self.max_datagram_frame_size,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(params: &TransportParameters, sender: endpoint::Type) -> TransportParameters {
        let mut buffer = [0u8; 512];
        let len = {
            let mut encoder = EncoderBuffer::new(&mut buffer);
            params.encode(sender, &mut encoder);
            encoder.len()
        };
        TransportParameters::decode(DecoderBuffer::new(&buffer[..len]), sender).unwrap()
    }

    #[test]
    fn round_trip_test() {
        let mut params = TransportParameters {
            initial_max_data: VarInt::from_u32(65536),
            initial_max_stream_data_bidi_local: VarInt::from_u32(32768),
            initial_max_stream_data_bidi_remote: VarInt::from_u32(65536),
            initial_max_streams_bidi: VarInt::from_u8(100),
            max_idle_timeout: VarInt::from_u32(30_000),
            max_udp_payload_size: VarInt::from_u16(1472),
            active_connection_id_limit: VarInt::from_u8(4),
            initial_source_connection_id: Some(
                ConnectionId::try_from_slice(&[1, 2, 3, 4]).unwrap(),
            ),
            ..Default::default()
        };

        assert_eq!(round_trip(&params, endpoint::Type::Client), params);

        params.original_destination_connection_id =
            Some(ConnectionId::try_from_slice(&[9, 9]).unwrap());
        params.stateless_reset_token = Some(StatelessResetToken::new([7; 16]));
        assert_eq!(round_trip(&params, endpoint::Type::Server), params);
    }

    #[test]
    fn server_only_parameter_from_client_test() {
        let params = TransportParameters {
            original_destination_connection_id: Some(ConnectionId::EMPTY),
            ..Default::default()
        };
        let mut buffer = [0u8; 128];
        let len = {
            let mut encoder = EncoderBuffer::new(&mut buffer);
            // encode as if a server had sent it, then claim a client did
            params.encode(endpoint::Type::Server, &mut encoder);
            encoder.len()
        };
        assert_eq!(
            TransportParameters::decode(
                DecoderBuffer::new(&buffer[..len]),
                endpoint::Type::Client
            )
            .unwrap_err()
            .code,
            Error::TRANSPORT_PARAMETER_ERROR
        );
    }

    #[test]
    fn bounds_test() {
        for (id, value) in [
            (id::ACK_DELAY_EXPONENT, 21u64),
            (id::MAX_ACK_DELAY, 1 << 14),
            (id::MAX_UDP_PAYLOAD_SIZE, 1199),
            (id::ACTIVE_CONNECTION_ID_LIMIT, 1),
        ] {
            let mut buffer = [0u8; 32];
            let len = {
                let mut encoder = EncoderBuffer::new(&mut buffer);
                VarInt::new(id).unwrap().encode(&mut encoder);
                let value = VarInt::new(value).unwrap();
                encoder.encode_with_len_prefix::<VarInt, _>(&value);
                encoder.len()
            };
            assert!(TransportParameters::decode(
                DecoderBuffer::new(&buffer[..len]),
                endpoint::Type::Client
            )
            .is_err());
        }
    }

    #[test]
    fn unknown_parameter_test() {
        // a reserved id is skipped
        let mut buffer = [0u8; 32];
        let len = {
            let mut encoder = EncoderBuffer::new(&mut buffer);
            VarInt::new(31 * 4 + 27).unwrap().encode(&mut encoder);
            VarInt::from_u8(1).encode(&mut encoder);
            0u8.encode(&mut encoder);
            encoder.len()
        };
        assert!(TransportParameters::decode(
            DecoderBuffer::new(&buffer[..len]),
            endpoint::Type::Client
        )
        .is_ok());

        // an unknown id below the private-use range is rejected
        let len = {
            let mut encoder = EncoderBuffer::new(&mut buffer);
            VarInt::new(0x21).unwrap().encode(&mut encoder);
            VarInt::ZERO.encode(&mut encoder);
            encoder.len()
        };
        assert!(TransportParameters::decode(
            DecoderBuffer::new(&buffer[..len]),
            endpoint::Type::Client
        )
        .is_err());
    }

    #[test]
    fn duplicate_parameter_test() {
        let mut buffer = [0u8; 32];
        let len = {
            let mut encoder = EncoderBuffer::new(&mut buffer);
            for _ in 0..2 {
                VarInt::new(id::INITIAL_MAX_DATA).unwrap().encode(&mut encoder);
                let value = VarInt::from_u8(1);
                encoder.encode_with_len_prefix::<VarInt, _>(&value);
            }
            encoder.len()
        };
        assert!(TransportParameters::decode(
            DecoderBuffer::new(&buffer[..len]),
            endpoint::Type::Client
        )
        .is_err());
    }
}
