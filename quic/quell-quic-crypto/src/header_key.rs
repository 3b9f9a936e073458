// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{header_protection_algorithm, Secret};
use quell_quic_core::crypto::{self, HeaderProtectionMask};
use ring::aead::quic;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.1
//# Header protection is applied after packet protection is applied (see
//# Section 5.3).  The ciphertext of the packet is sampled and used as
//# input to an encryption algorithm.  The algorithm used depends on the
//# negotiated AEAD.

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.2
//# An endpoint MUST discard packets that are not long enough to contain
//# a complete sample.
const SAMPLE_LEN: usize = 16;

/// A one-direction header protection key
pub struct HeaderProtectionKey {
    key: quic::HeaderProtectionKey,
}

impl core::fmt::Debug for HeaderProtectionKey {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("HeaderProtectionKey").finish_non_exhaustive()
    }
}

impl HeaderProtectionKey {
    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.1
    //# The header protection key uses the "quic hp" label
    pub fn new(secret: &Secret) -> Self {
        let suite = secret.cipher_suite();
        let algorithm = header_protection_algorithm(suite);
        let key_bytes = secret.expand_label(b"quic hp", algorithm.key_len());
        let key = quic::HeaderProtectionKey::new(algorithm, &key_bytes)
            .expect("key length matches the suite");

        Self { key }
    }
}

impl crypto::HeaderKey for HeaderProtectionKey {
    fn header_protection_mask(&self, ciphertext_sample: &[u8]) -> HeaderProtectionMask {
        self.key
            .new_mask(ciphertext_sample)
            .expect("sample length is validated by the caller")
    }

    fn sample_len(&self) -> usize {
        SAMPLE_LEN
    }
}
