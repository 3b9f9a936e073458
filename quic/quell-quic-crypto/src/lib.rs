// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! ring-backed packet protection for quell-quic
//!
//! Implements the `Key` and `HeaderKey` traits from `quell-quic-core` for
//! the three QUIC v1 cipher suites, the HKDF key schedule, and the Retry
//! integrity tag.

extern crate alloc;

pub mod header_key;
pub mod initial;
pub mod key;
pub mod retry;
pub mod secret;

pub use header_key::HeaderProtectionKey;
pub use key::PacketKey;
pub use secret::Secret;

use quell_quic_core::{crypto::CipherSuite, endpoint};

/// The packet protection and header protection keys for one direction at
/// one encryption level
#[derive(Debug)]
pub struct DirectionalKeys {
    pub packet: PacketKey,
    pub header: HeaderProtectionKey,
}

impl DirectionalKeys {
    /// Derives both keys from a traffic secret
    pub fn new(secret: &Secret) -> Self {
        Self {
            packet: PacketKey::new(secret),
            header: HeaderProtectionKey::new(secret),
        }
    }
}

/// Sealer and opener key pairs for one encryption level
#[derive(Debug)]
pub struct KeyPair {
    pub sealer: DirectionalKeys,
    pub opener: DirectionalKeys,
}

impl KeyPair {
    /// Builds the level's keys from the local and peer traffic secrets
    pub fn new(local: &Secret, peer: &Secret) -> Self {
        debug_assert_eq!(local.cipher_suite(), peer.cipher_suite());
        Self {
            sealer: DirectionalKeys::new(local),
            opener: DirectionalKeys::new(peer),
        }
    }

    /// Builds the Initial keys for the given endpoint type from the
    /// client's first Destination Connection ID
    pub fn new_initial(endpoint: endpoint::Type, client_dcid: &[u8]) -> Self {
        let (client, server) = initial::initial_secrets(client_dcid);
        match endpoint {
            endpoint::Type::Client => Self::new(&client, &server),
            endpoint::Type::Server => Self::new(&server, &client),
        }
    }
}

#[inline]
pub(crate) fn aead_algorithm(suite: CipherSuite) -> &'static ring::aead::Algorithm {
    match suite {
        CipherSuite::Aes128GcmSha256 => &ring::aead::AES_128_GCM,
        CipherSuite::Aes256GcmSha384 => &ring::aead::AES_256_GCM,
        CipherSuite::Chacha20Poly1305Sha256 => &ring::aead::CHACHA20_POLY1305,
    }
}

#[inline]
pub(crate) fn hkdf_algorithm(suite: CipherSuite) -> ring::hkdf::Algorithm {
    match suite {
        CipherSuite::Aes128GcmSha256 | CipherSuite::Chacha20Poly1305Sha256 => {
            ring::hkdf::HKDF_SHA256
        }
        CipherSuite::Aes256GcmSha384 => ring::hkdf::HKDF_SHA384,
    }
}

#[inline]
pub(crate) fn header_protection_algorithm(
    suite: CipherSuite,
) -> &'static ring::aead::quic::Algorithm {
    match suite {
        CipherSuite::Aes128GcmSha256 => &ring::aead::quic::AES_128,
        CipherSuite::Aes256GcmSha384 => &ring::aead::quic::AES_256,
        CipherSuite::Chacha20Poly1305Sha256 => &ring::aead::quic::CHACHA20,
    }
}
