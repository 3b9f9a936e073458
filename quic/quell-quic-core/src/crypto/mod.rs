// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! QUIC cryptography traits and header-protection primitives
//!
//! The concrete AEAD and HKDF machinery lives in `quell-quic-crypto`; this
//! module defines the traits the transport drives and the in-place header
//! protection procedure, which is independent of the cipher backend.

#![forbid(unsafe_code)]

pub mod initial;
pub mod label;
pub mod packet_protection;

use crate::packet::number::{PacketNumberSpace, TruncatedPacketNumber};
use quell_codec::DecoderBuffer;

//= https://www.rfc-editor.org/rfc/rfc9001#section-2.1
//# Data is protected using a number of encryption levels:
//#
//# *  Initial keys
//#
//# *  Early data (0-RTT) keys
//#
//# *  Handshake keys
//#
//# *  Application data (1-RTT) keys

/// The four encryption levels, each mapping onto a packet number space
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EncryptionLevel {
    Initial,
    Handshake,
    ZeroRtt,
    OneRtt,
}

impl EncryptionLevel {
    /// The packet number space protected at this level
    #[inline]
    pub fn space(self) -> PacketNumberSpace {
        match self {
            Self::Initial => PacketNumberSpace::Initial,
            Self::Handshake => PacketNumberSpace::Handshake,
            Self::ZeroRtt | Self::OneRtt => PacketNumberSpace::ApplicationData,
        }
    }
}

/// The AEAD cipher suites defined for QUIC v1
//= https://www.rfc-editor.org/rfc/rfc9001#section-5.3
//# QUIC can use any of the cipher suites defined in [TLS13] with the
//# exception of TLS_AES_128_CCM_8_SHA256.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CipherSuite {
    Aes128GcmSha256,
    Aes256GcmSha384,
    Chacha20Poly1305Sha256,
}

impl CipherSuite {
    /// The length of the AEAD key in bytes
    #[inline]
    pub const fn key_len(self) -> usize {
        match self {
            Self::Aes128GcmSha256 => 16,
            Self::Aes256GcmSha384 | Self::Chacha20Poly1305Sha256 => 32,
        }
    }

    /// The length of the negotiated hash in bytes
    #[inline]
    pub const fn hash_len(self) -> usize {
        match self {
            Self::Aes128GcmSha256 | Self::Chacha20Poly1305Sha256 => 32,
            Self::Aes256GcmSha384 => 48,
        }
    }

    /// The length of the authentication tag in bytes
    #[inline]
    pub const fn tag_len(self) -> usize {
        16
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#section-6.6
    //# For AEAD_AES_128_GCM and AEAD_AES_256_GCM, the confidentiality limit
    //# is 2^23 encrypted packets; see Appendix B.1.  For
    //# AEAD_CHACHA20_POLY1305, the confidentiality limit is greater than the
    //# number of possible packets (2^62) and so can be disregarded.
    #[inline]
    pub const fn confidentiality_limit(self) -> u64 {
        match self {
            Self::Aes128GcmSha256 | Self::Aes256GcmSha384 => 1 << 23,
            Self::Chacha20Poly1305Sha256 => 1 << 62,
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#section-6.6
    //# For AEAD_AES_128_GCM and AEAD_AES_256_GCM, the integrity limit is
    //# 2^52 invalid packets; see Appendix B.1.  For AEAD_CHACHA20_POLY1305,
    //# the integrity limit is 2^36 invalid packets; see Appendix B.2.
    #[inline]
    pub const fn integrity_limit(self) -> u64 {
        match self {
            Self::Aes128GcmSha256 | Self::Aes256GcmSha384 => 1 << 52,
            Self::Chacha20Poly1305Sha256 => 1 << 36,
        }
    }
}

/// A one-direction packet protection key
pub trait Key: Send {
    /// Decrypts `payload` (ciphertext followed by the tag) in place,
    /// returning the plaintext length
    fn decrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<usize, packet_protection::Error>;

    /// Encrypts `payload` in place; the final `tag_len` bytes of `payload`
    /// are overwritten with the authentication tag
    fn encrypt(
        &self,
        packet_number: u64,
        header: &[u8],
        payload: &mut [u8],
    ) -> Result<(), packet_protection::Error>;

    /// Length of the appended tag
    fn tag_len(&self) -> usize;

    /// Maximum number of packets this key may encrypt
    fn aead_confidentiality_limit(&self) -> u64;

    /// Maximum number of decryption failures allowed for the suite
    fn aead_integrity_limit(&self) -> u64;

    fn cipher_suite(&self) -> CipherSuite;
}

/// A one-direction header protection key
pub trait HeaderKey: Send {
    /// Derives a header protection mask from a ciphertext sample
    fn header_protection_mask(&self, ciphertext_sample: &[u8]) -> HeaderProtectionMask;

    /// The sample length the key requires
    fn sample_len(&self) -> usize;
}

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.1
//# The output of this algorithm is a 5-byte mask that is applied to the
//# protected header fields using exclusive OR.
pub const HEADER_PROTECTION_MASK_LEN: usize = 5;
pub type HeaderProtectionMask = [u8; HEADER_PROTECTION_MASK_LEN];

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.2
//# in sampling packet ciphertext for header protection, the Packet Number
//# field is assumed to be 4 bytes long
const MAX_PACKET_NUMBER_LEN: usize = 4;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.1
//# mask = header_protection(hp_key, sample)
//#
//# pn_length = (packet[0] & 0x03) + 1
//# if (packet[0] & 0x80) == 0x80:
//#    # Long header: 4 bits masked
//#    packet[0] ^= mask[0] & 0x0f
//# else:
//#    # Short header: 5 bits masked
//#    packet[0] ^= mask[0] & 0x1f
//#
//# # pn_offset is the start of the Packet Number field.
//# packet[pn_offset:pn_offset+pn_length] ^= mask[1:1+pn_length]

const LONG_HEADER_TAG: u8 = 0x80;
pub(crate) const LONG_HEADER_MASK: u8 = 0x0f;
pub(crate) const SHORT_HEADER_MASK: u8 = 0x1f;

#[inline(always)]
fn mask_from_packet_tag(tag: u8) -> u8 {
    if tag & LONG_HEADER_TAG == LONG_HEADER_TAG {
        LONG_HEADER_MASK
    } else {
        SHORT_HEADER_MASK
    }
}

#[inline(always)]
fn xor_mask(packet_number_bytes: &mut [u8], mask: &HeaderProtectionMask) {
    for (byte, mask_byte) in packet_number_bytes.iter_mut().zip(&mask[1..]) {
        *byte ^= mask_byte;
    }
}

/// Takes the header protection sample for a packet whose packet number
/// field starts at `pn_offset`
#[inline]
fn sample<'a, K: HeaderKey + ?Sized>(
    key: &K,
    packet: &'a [u8],
    pn_offset: usize,
) -> Result<&'a [u8], packet_protection::Error> {
    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.4.2
    //# sample_offset = pn_offset + 4
    let start = pn_offset + MAX_PACKET_NUMBER_LEN;
    let end = start + key.sample_len();
    packet
        .get(start..end)
        .ok_or(packet_protection::Error::INSUFFICIENT_SAMPLE)
}

/// Removes header protection in place.
///
/// On return the first byte and packet number bytes are unprotected; the
/// decoded truncated packet number is returned.
#[inline]
pub fn remove_header_protection<K: HeaderKey + ?Sized>(
    space: PacketNumberSpace,
    key: &K,
    packet: &mut [u8],
    pn_offset: usize,
) -> Result<TruncatedPacketNumber, packet_protection::Error> {
    let mask = key.header_protection_mask(sample(key, packet, pn_offset)?);

    packet[0] ^= mask[0] & mask_from_packet_tag(packet[0]);
    let packet_number_len = space.new_packet_number_len(packet[0]);

    let pn_end = pn_offset + packet_number_len.bytesize();
    let packet_number_bytes = packet
        .get_mut(pn_offset..pn_end)
        .ok_or(packet_protection::Error::INSUFFICIENT_SAMPLE)?;
    xor_mask(packet_number_bytes, &mask);

    let (packet_number, _) = packet_number_len
        .decode_truncated_packet_number(DecoderBuffer::new(packet_number_bytes))
        .map_err(|_| packet_protection::Error::INSUFFICIENT_SAMPLE)?;

    Ok(packet_number)
}

/// Applies header protection in place over an encrypted packet
#[inline]
pub fn apply_header_protection<K: HeaderKey + ?Sized>(
    key: &K,
    packet: &mut [u8],
    pn_offset: usize,
    packet_number_len: usize,
) -> Result<(), packet_protection::Error> {
    let mask = key.header_protection_mask(sample(key, packet, pn_offset)?);

    packet[0] ^= mask[0] & mask_from_packet_tag(packet[0]);

    let pn_end = pn_offset + packet_number_len;
    let packet_number_bytes = packet
        .get_mut(pn_offset..pn_end)
        .ok_or(packet_protection::Error::INSUFFICIENT_SAMPLE)?;
    xor_mask(packet_number_bytes, &mask);

    Ok(())
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;

    /// A header key producing a fixed mask
    #[derive(Clone, Debug, Default)]
    pub struct HeaderKey(pub HeaderProtectionMask);

    impl super::HeaderKey for HeaderKey {
        fn header_protection_mask(&self, _sample: &[u8]) -> HeaderProtectionMask {
            self.0
        }

        fn sample_len(&self) -> usize {
            16
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::number::PacketNumberSpace;
    use bolero::check;

    /// Applying and removing protection with the same key restores the
    /// packet bytes, in either order
    #[test]
    fn involution_test() {
        check!().with_type::<([u8; 64], [u8; 5])>().for_each(|(packet, mask)| {
            let pn_offset = 4;
            let key = testing::HeaderKey(*mask);
            let space = PacketNumberSpace::ApplicationData;

            // remove(apply(p)) == p
            let mut protected = *packet;
            let pn_len = space.new_packet_number_len(protected[0]).bytesize();
            apply_header_protection(&key, &mut protected, pn_offset, pn_len).unwrap();
            remove_header_protection(space, &key, &mut protected, pn_offset).unwrap();
            assert_eq!(&protected[..], &packet[..]);

            // apply(remove(p)) == p, using the packet number length the
            // removal derived from the unmasked first byte
            let mut removed = *packet;
            let truncated =
                remove_header_protection(space, &key, &mut removed, pn_offset).unwrap();
            apply_header_protection(
                &key,
                &mut removed,
                pn_offset,
                truncated.len().bytesize(),
            )
            .unwrap();
            assert_eq!(&removed[..], &packet[..]);
        });
    }

    #[test]
    fn insufficient_sample_test() {
        let key = testing::HeaderKey::default();
        let mut packet = [0u8; 10];
        assert_eq!(
            remove_header_protection(PacketNumberSpace::Initial, &key, &mut packet, 4),
            Err(packet_protection::Error::INSUFFICIENT_SAMPLE)
        );
    }
}
