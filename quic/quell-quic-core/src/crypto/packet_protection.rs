// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use core::fmt;

/// An error while protecting or unprotecting a packet
///
/// The reason is only for diagnostics; packet protection failures are
/// usually handled by silently dropping the packet.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Error {
    pub reason: &'static str,
}

impl Error {
    /// The AEAD failed to authenticate the packet
    pub const DECRYPT_ERROR: Self = Self {
        reason: "decrypt error",
    };

    /// The packet is too short to contain a header protection sample
    pub const INSUFFICIENT_SAMPLE: Self = Self {
        reason: "insufficient sample",
    };

    /// The key has protected as many packets as the suite permits
    pub const AEAD_LIMIT_REACHED: Self = Self {
        reason: "aead limit reached",
    };

    /// An internal failure in the crypto backend
    pub const INTERNAL_ERROR: Self = Self {
        reason: "crypto internal error",
    };
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("packet_protection::Error")
            .field(&self.reason)
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.reason)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
