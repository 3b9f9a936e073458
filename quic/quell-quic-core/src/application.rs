// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::varint::VarInt;
use core::fmt;

//= https://www.rfc-editor.org/rfc/rfc9000#section-20.2
//# The management of application error codes is left to application
//# protocols.

/// An application-defined error code, carried by RESET_STREAM,
/// STOP_SENDING and the 0x1d variant of CONNECTION_CLOSE.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Error(VarInt);

impl Error {
    /// An error code of `0`, commonly used for orderly termination
    pub const UNKNOWN: Self = Self(VarInt::ZERO);

    #[inline]
    pub const fn new(code: VarInt) -> Self {
        Self(code)
    }

    #[inline]
    pub const fn as_varint(self) -> VarInt {
        self.0
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "application error: {}", self.0)
    }
}

impl From<VarInt> for Error {
    #[inline]
    fn from(value: VarInt) -> Self {
        Self(value)
    }
}

impl From<Error> for VarInt {
    #[inline]
    fn from(value: Error) -> Self {
        value.0
    }
}

impl From<u32> for Error {
    #[inline]
    fn from(value: u32) -> Self {
        Self(VarInt::from_u32(value))
    }
}
