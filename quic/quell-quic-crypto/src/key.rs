// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{aead_algorithm, Secret};
use quell_quic_core::crypto::{self, packet_protection, CipherSuite};
use ring::aead;
use zeroize::Zeroize;

/// The per-packet initialization vector, combined with the packet number to
/// form the AEAD nonce
pub(crate) struct Iv([u8; Iv::LEN]);

impl Iv {
    pub(crate) const LEN: usize = 12;

    fn new(bytes: &[u8]) -> Self {
        let mut iv = [0; Self::LEN];
        iv.copy_from_slice(bytes);
        Self(iv)
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.3
    //# The nonce, N, is formed by combining the packet protection IV with
    //# the packet number.  The 62 bits of the reconstructed QUIC packet
    //# number in network byte order are left-padded with zeros to the size
    //# of the IV.  The exclusive OR of the padded packet number and the IV
    //# forms the AEAD nonce.
    fn nonce(&self, packet_number: u64) -> [u8; Self::LEN] {
        let mut nonce = self.0;
        for (nonce_byte, pn_byte) in nonce[Self::LEN - 8..]
            .iter_mut()
            .zip(packet_number.to_be_bytes())
        {
            *nonce_byte ^= pn_byte;
        }
        nonce
    }
}

impl Drop for Iv {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// A one-direction AEAD packet protection key
pub struct PacketKey {
    key: aead::LessSafeKey,
    iv: Iv,
    suite: CipherSuite,
}

impl core::fmt::Debug for PacketKey {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("PacketKey").field("suite", &self.suite).finish()
    }
}

impl PacketKey {
    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.1
    //# The current encryption level secret and the label "quic key" are
    //# input to the KDF to produce the AEAD key; the label "quic iv" is used
    //# to derive the Initialization Vector (IV); see Section 5.3.
    pub fn new(secret: &Secret) -> Self {
        let suite = secret.cipher_suite();

        let key_bytes = secret.expand_label(b"quic key", suite.key_len());
        let unbound = aead::UnboundKey::new(aead_algorithm(suite), &key_bytes)
            .expect("key length matches the suite");
        let iv_bytes = secret.expand_label(b"quic iv", Iv::LEN);

        Self {
            key: aead::LessSafeKey::new(unbound),
            iv: Iv::new(&iv_bytes),
            suite,
        }
    }

    #[cfg(test)]
    pub(crate) fn nonce_for_test(&self, packet_number: u64) -> [u8; Iv::LEN] {
        self.iv.nonce(packet_number)
    }
}

impl crypto::Key for PacketKey {
    fn decrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<usize, packet_protection::Error> {
        let nonce = aead::Nonce::assume_unique_for_key(self.iv.nonce(packet_number));
        let aad = aead::Aad::from(header);

        let plaintext = self
            .key
            .open_in_place(nonce, aad, payload)
            .map_err(|_| packet_protection::Error::DECRYPT_ERROR)?;

        Ok(plaintext.len())
    }

    fn encrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<(), packet_protection::Error> {
        let nonce = aead::Nonce::assume_unique_for_key(self.iv.nonce(packet_number));
        let aad = aead::Aad::from(header);

        let tag_len = self.key.algorithm().tag_len();
        let plaintext_len = payload
            .len()
            .checked_sub(tag_len)
            .ok_or(packet_protection::Error::INTERNAL_ERROR)?;

        let (in_out, tag_out) = payload.split_at_mut(plaintext_len);
        let tag = self
            .key
            .seal_in_place_separate_tag(nonce, aad, in_out)
            .map_err(|_| packet_protection::Error::INTERNAL_ERROR)?;
        tag_out.copy_from_slice(tag.as_ref());

        Ok(())
    }

    fn tag_len(&self) -> usize {
        self.key.algorithm().tag_len()
    }

    fn aead_confidentiality_limit(&self) -> u64 {
        self.suite.confidentiality_limit()
    }

    fn aead_integrity_limit(&self) -> u64 {
        self.suite.integrity_limit()
    }

    fn cipher_suite(&self) -> CipherSuite {
        self.suite
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;
    use quell_quic_core::crypto::Key as _;

    fn test_key() -> PacketKey {
        PacketKey::new(&Secret::new(CipherSuite::Aes128GcmSha256, &[7; 32]))
    }

    /// Any single-bit flip in header or ciphertext causes decryption to
    /// fail
    #[test]
    fn bit_flip_integrity_test() {
        let key = test_key();
        let mut header = [0x40u8, 1, 2, 3];
        let payload = b"some frames".to_vec();

        let mut sealed = payload.clone();
        sealed.extend_from_slice(&[0; 16]);
        key.encrypt(7, &header, &mut sealed).unwrap();

        // unmodified round trip succeeds
        let mut opened = sealed.clone();
        let len = key.decrypt(7, &header, &mut opened).unwrap();
        assert_eq!(&opened[..len], payload.as_slice());

        // flip each bit of the ciphertext
        for index in 0..sealed.len() {
            for bit in 0..8 {
                let mut tampered = sealed.clone();
                tampered[index] ^= 1 << bit;
                assert!(key.decrypt(7, &header, &mut tampered).is_err());
            }
        }

        // flip each bit of the header
        for index in 0..header.len() {
            for bit in 0..8 {
                header[index] ^= 1 << bit;
                let mut tampered = sealed.clone();
                assert!(key.decrypt(7, &header, &mut tampered).is_err());
                header[index] ^= 1 << bit;
            }
        }

        // a different packet number changes the nonce
        let mut tampered = sealed;
        assert!(key.decrypt(8, &header, &mut tampered).is_err());
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
    //= type=test
    //# iv  = fa044b2f42a3fd3b46fb255c
    #[test]
    fn nonce_construction_test() {
        let iv = Iv::new(&hex!("fa044b2f42a3fd3b46fb255c"));
        assert_eq!(iv.nonce(0), hex!("fa044b2f42a3fd3b46fb255c"));
        assert_eq!(iv.nonce(1), hex!("fa044b2f42a3fd3b46fb255d"));
        assert_eq!(iv.nonce(2), hex!("fa044b2f42a3fd3b46fb255e"));
    }
}
