// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{application, varint::VarInt};
use core::fmt;
use quell_codec::DecoderError;

//= https://www.rfc-editor.org/rfc/rfc9000#section-20.1
//# QUIC transport error codes and application error codes are 62-bit
//# unsigned integers.

/// An error on the QUIC transport layer, carried by CONNECTION_CLOSE (0x1c)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Error {
    pub code: VarInt,
    pub frame_type: Option<VarInt>,
    pub reason: &'static str,
}

impl Error {
    /// Creates a new `Error` with the specified information
    pub const fn new(code: VarInt, reason: &'static str, frame_type: Option<VarInt>) -> Self {
        Self {
            code,
            reason,
            frame_type,
        }
    }

    /// Updates the `Error` with the specified `frame_type`
    #[must_use]
    pub const fn with_frame_type(mut self, frame_type: VarInt) -> Self {
        self.frame_type = Some(frame_type);
        self
    }

    /// Updates the `Error` with the specified `reason`
    #[must_use]
    pub const fn with_reason(mut self, reason: &'static str) -> Self {
        self.reason = reason;
        self
    }

    /// Creates a crypto-level `Error` from a TLS alert code
    ///
    //= https://www.rfc-editor.org/rfc/rfc9001#section-4.8
    //# A TLS alert is converted into a QUIC connection error.  The
    //# AlertDescription value is added to 0x0100 to produce a QUIC error
    //# code from the range reserved for CRYPTO_ERROR.
    #[inline]
    pub fn crypto_error(code: u8, reason: &'static str) -> Self {
        Self {
            code: VarInt::from_u32(0x100 | u32::from(code)),
            reason,
            frame_type: None,
        }
    }

    /// Creates an application-level `Error`, carried by CONNECTION_CLOSE (0x1d)
    #[inline]
    pub const fn application_error(code: VarInt, reason: &'static str) -> Self {
        Self {
            code,
            reason,
            frame_type: None,
        }
    }

    /// Returns the application error code if this error was produced by the
    /// application rather than the transport
    #[inline]
    pub fn application_error_code(&self) -> Option<application::Error> {
        if self.frame_type.is_none() {
            Some(self.code.into())
        } else {
            None
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.reason.is_empty() {
            let code: u64 = self.code.into();
            write!(f, "TransportError({code})")?;
        } else {
            f.write_str(self.reason)?;
        }

        Ok(())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Internal convenience macro for defining standard error codes
macro_rules! def_error {
    ($doc:expr, $name:ident, $code:expr) => {
        impl Error {
            #[doc = $doc]
            pub const $name: VarInt = VarInt::from_u32($code);
        }
    };
}

//= https://www.rfc-editor.org/rfc/rfc9000#section-20.1
//# NO_ERROR (0x00):  An endpoint uses this with CONNECTION_CLOSE to
//#    signal that the connection is being closed abruptly in the absence
//#    of any error.
def_error!(
    "The connection is being closed abruptly in the absence of any error.",
    NO_ERROR,
    0x0
);

//# INTERNAL_ERROR (0x01):  The endpoint encountered an internal error and
//#    cannot continue with the connection.
def_error!(
    "The endpoint encountered an internal error and cannot continue with the connection.",
    INTERNAL_ERROR,
    0x1
);

//# CONNECTION_REFUSED (0x02):  The server refused to accept a new connection.
def_error!(
    "The server refused to accept a new connection.",
    CONNECTION_REFUSED,
    0x2
);

//# FLOW_CONTROL_ERROR (0x03):  An endpoint received more data than it
//#    permitted in its advertised data limits.
def_error!(
    "An endpoint received more data than it permitted in its advertised data limits.",
    FLOW_CONTROL_ERROR,
    0x3
);

//# STREAM_LIMIT_ERROR (0x04):  An endpoint received a frame for a stream
//#    identifier that exceeded its advertised stream limit for the
//#    corresponding stream type.
def_error!(
    "An endpoint received a frame for a stream identifier that exceeded its advertised stream limit.",
    STREAM_LIMIT_ERROR,
    0x4
);

//# STREAM_STATE_ERROR (0x05):  An endpoint received a frame for a stream
//#    that was not in a state that permitted that frame.
def_error!(
    "An endpoint received a frame for a stream that was not in a state that permitted that frame.",
    STREAM_STATE_ERROR,
    0x5
);

//# FINAL_SIZE_ERROR (0x06):  (1) An endpoint received a STREAM frame
//#    containing data that exceeded the previously established final
//#    size, (2) an endpoint received a STREAM frame or a RESET_STREAM
//#    frame containing a final size that was lower than the size of
//#    stream data that was already received, or (3) an endpoint received
//#    a STREAM frame or a RESET_STREAM frame containing a different
//#    final size to the one already established.
def_error!(
    "An endpoint received a STREAM or RESET_STREAM frame inconsistent with the established final size.",
    FINAL_SIZE_ERROR,
    0x6
);

//# FRAME_ENCODING_ERROR (0x07):  An endpoint received a frame that was
//#    badly formatted.
def_error!(
    "An endpoint received a frame that was badly formatted.",
    FRAME_ENCODING_ERROR,
    0x7
);

//# TRANSPORT_PARAMETER_ERROR (0x08):  An endpoint received transport
//#    parameters that were badly formatted, included an invalid value,
//#    omitted a mandatory transport parameter, included a forbidden
//#    transport parameter, or were otherwise in error.
def_error!(
    "An endpoint received transport parameters that were badly formatted or invalid.",
    TRANSPORT_PARAMETER_ERROR,
    0x8
);

//# CONNECTION_ID_LIMIT_ERROR (0x09):  The number of connection IDs
//#    provided by the peer exceeds the advertised
//#    active_connection_id_limit.
def_error!(
    "The number of connection IDs provided by the peer exceeds the advertised limit.",
    CONNECTION_ID_LIMIT_ERROR,
    0x9
);

//# PROTOCOL_VIOLATION (0x0a):  An endpoint detected an error with
//#    protocol compliance that was not covered by more specific error
//#    codes.
def_error!(
    "An endpoint detected an error with protocol compliance that was not covered by more specific error codes.",
    PROTOCOL_VIOLATION,
    0xA
);

//# INVALID_TOKEN (0x0b):  A server received a client Initial that
//#    contained an invalid Token field.
def_error!(
    "A server received a client Initial that contained an invalid Token field.",
    INVALID_TOKEN,
    0xB
);

//# APPLICATION_ERROR (0x0c):  The application or application protocol
//#    caused the connection to be closed.
def_error!(
    "The application or application protocol caused the connection to be closed.",
    APPLICATION_ERROR,
    0xC
);

//# CRYPTO_BUFFER_EXCEEDED (0x0d):  An endpoint has received more data in
//#    CRYPTO frames than it can buffer.
def_error!(
    "An endpoint has received more data in CRYPTO frames than it can buffer.",
    CRYPTO_BUFFER_EXCEEDED,
    0xD
);

//# KEY_UPDATE_ERROR (0x0e):  An endpoint detected errors in performing
//#    key updates.
def_error!(
    "An endpoint detected errors in performing key updates.",
    KEY_UPDATE_ERROR,
    0xE
);

//# AEAD_LIMIT_REACHED (0x0f):  An endpoint has reached the
//#    confidentiality or integrity limit for the AEAD algorithm used by
//#    the given connection.
def_error!(
    "An endpoint has reached the confidentiality or integrity limit for the AEAD algorithm.",
    AEAD_LIMIT_REACHED,
    0xF
);

//# NO_VIABLE_PATH (0x10):  An endpoint has determined that the network
//#    path is incapable of supporting QUIC.
def_error!(
    "An endpoint has determined that the network path is incapable of supporting QUIC.",
    NO_VIABLE_PATH,
    0x10
);

impl From<DecoderError> for Error {
    fn from(decoder_error: DecoderError) -> Self {
        match decoder_error {
            DecoderError::InvariantViolation(reason) => {
                Self::new(Self::PROTOCOL_VIOLATION, reason, None)
            }
            _ => Self::new(Self::FRAME_ENCODING_ERROR, "malformed encoding", None),
        }
    }
}

impl From<crate::varint::VarIntError> for Error {
    fn from(_: crate::varint::VarIntError) -> Self {
        Self::new(Self::INTERNAL_ERROR, "varint range exceeded", None)
    }
}

impl From<crate::crypto::packet_protection::Error> for Error {
    fn from(error: crate::crypto::packet_protection::Error) -> Self {
        Self::new(Self::PROTOCOL_VIOLATION, error.reason, None)
    }
}

/// Creates an `Error` with variable arguments
#[macro_export]
macro_rules! transport_error {
    ($error:ident) => {
        $crate::transport::error::Error::new(
            $crate::transport::error::Error::$error,
            "",
            None,
        )
    };
    ($error:ident, $reason:expr) => {
        $crate::transport::error::Error::new(
            $crate::transport::error::Error::$error,
            $reason,
            None,
        )
    };
    ($error:ident, $reason:expr, $frame_type:expr) => {
        $crate::transport::error::Error::new(
            $crate::transport::error::Error::$error,
            $reason,
            Some($frame_type),
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_test() {
        let error = transport_error!(FLOW_CONTROL_ERROR, "stream exceeded data window");
        assert_eq!(error.to_string(), "stream exceeded data window");

        let error = Error::new(Error::PROTOCOL_VIOLATION, "", None);
        assert_eq!(error.to_string(), "TransportError(10)");
    }

    #[test]
    fn crypto_error_range_test() {
        let error = Error::crypto_error(40, "handshake failure");
        assert_eq!(error.code.as_u64(), 0x128);
    }
}
