// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::hkdf_algorithm;
use alloc::vec::Vec;
use quell_quic_core::crypto::{label, CipherSuite};
use zeroize::Zeroize;

/// The maximum hash output across the supported suites (SHA-384)
const MAX_SECRET_LEN: usize = 48;

/// A TLS traffic secret, zeroized on drop
pub struct Secret {
    bytes: [u8; MAX_SECRET_LEN],
    len: usize,
    suite: CipherSuite,
}

impl core::fmt::Debug for Secret {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        // never print key material
        f.debug_struct("Secret").field("suite", &self.suite).finish()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl Clone for Secret {
    fn clone(&self) -> Self {
        Self {
            bytes: self.bytes,
            len: self.len,
            suite: self.suite,
        }
    }
}

impl Secret {
    /// Wraps a secret exported by the TLS session
    pub fn new(suite: CipherSuite, secret: &[u8]) -> Self {
        debug_assert_eq!(secret.len(), suite.hash_len());
        let mut bytes = [0; MAX_SECRET_LEN];
        let len = secret.len().min(MAX_SECRET_LEN);
        bytes[..len].copy_from_slice(&secret[..len]);
        Self { bytes, len, suite }
    }

    #[inline]
    pub fn cipher_suite(&self) -> CipherSuite {
        self.suite
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    /// HKDF-Expand-Label over this secret
    pub(crate) fn expand_label(&self, label_name: &[u8], len: usize) -> Vec<u8> {
        let prk = ring::hkdf::Prk::new_less_safe(hkdf_algorithm(self.suite), self.as_slice());
        expand(&prk, label_name, len)
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#section-6.1
    //# The endpoint creates a new write secret from the existing write
    //# secret as performed in Section 7.2 of [TLS13].  This uses the KDF
    //# function provided by TLS with a label of "quic ku".
    /// Derives the next-generation secret for a 1-RTT key update
    #[must_use]
    pub fn next_key_update(&self) -> Self {
        let next = self.expand_label(b"quic ku", self.suite.hash_len());
        Self::new(self.suite, &next)
    }
}

struct OkmLen(usize);

impl ring::hkdf::KeyType for OkmLen {
    fn len(&self) -> usize {
        self.0
    }
}

/// HKDF-Expand-Label(prk, "tls13 " + label, "", len)
pub(crate) fn expand(prk: &ring::hkdf::Prk, label_name: &[u8], len: usize) -> Vec<u8> {
    let mut info = Vec::with_capacity(32);
    label::compute_label(len, label_name, &mut info);

    let mut out = alloc::vec![0u8; len];
    prk.expand(&[&info], OkmLen(len))
        .expect("label length is always within hkdf bounds")
        .fill(&mut out)
        .expect("output length matches the requested okm length");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_not_printed() {
        let secret = Secret::new(CipherSuite::Aes128GcmSha256, &[0x42; 32]);
        let formatted = alloc::format!("{secret:?}");
        assert!(!formatted.contains("42"));
    }

    #[test]
    fn key_update_changes_secret() {
        let secret = Secret::new(CipherSuite::Aes128GcmSha256, &[0x42; 32]);
        let next = secret.next_key_update();
        assert_ne!(secret.as_slice(), next.as_slice());
        assert_eq!(next.as_slice().len(), 32);
        // the derivation is deterministic
        assert_eq!(secret.next_key_update().as_slice(), next.as_slice());
    }
}
