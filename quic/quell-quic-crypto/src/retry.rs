// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use hex_literal::hex;
use quell_quic_core::{
    crypto::packet_protection,
    packet::retry::{IntegrityTag, INTEGRITY_TAG_LEN},
};
use ring::aead;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.8
//# The Retry Integrity Tag is a 128-bit field that is computed as the
//# output of AEAD_AES_128_GCM [AEAD] used with the following inputs:
//#
//# *  The secret key, K, is 128 bits equal to
//#    0xbe0c690b9f66575a1d766b54e368c84e.
//#
//# *  The nonce, N, is 96 bits equal to 0x461599d35d632bf2239825bb.
//#
//# *  The plaintext, P, is empty.
//#
//# *  The associated data, A, is the contents of the Retry Pseudo-
//#    Packet

const SECRET_KEY: [u8; 16] = hex!("be0c690b9f66575a1d766b54e368c84e");
const NONCE: [u8; 12] = hex!("461599d35d632bf2239825bb");

fn retry_key() -> aead::LessSafeKey {
    let unbound = aead::UnboundKey::new(&aead::AES_128_GCM, &SECRET_KEY)
        .expect("the fixed retry key is a valid AES-128 key");
    aead::LessSafeKey::new(unbound)
}

/// Computes the integrity tag over a Retry pseudo-packet
pub fn generate_tag(pseudo_packet: &[u8]) -> IntegrityTag {
    let key = retry_key();
    let nonce = aead::Nonce::assume_unique_for_key(NONCE);

    let mut in_out = [0u8; 0];
    let tag = key
        .seal_in_place_separate_tag(nonce, aead::Aad::from(pseudo_packet), &mut in_out)
        .expect("sealing an empty plaintext cannot fail");

    let mut out = [0; INTEGRITY_TAG_LEN];
    out.copy_from_slice(tag.as_ref());
    out
}

/// Validates the integrity tag of a received Retry packet
pub fn validate(pseudo_packet: &[u8], tag: IntegrityTag) -> Result<(), packet_protection::Error> {
    use ring::constant_time::verify_slices_are_equal;

    let expected = generate_tag(pseudo_packet);
    verify_slices_are_equal(&expected, &tag)
        .map_err(|_| packet_protection::Error::DECRYPT_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.4
    //= type=test
    //# This shows a Retry packet that might be sent in response to the
    //# Initial packet in Appendix A.2.  The integrity check includes the
    //# client-chosen connection ID value of 0x8394c8f03e515708, but that
    //# value is not included in the final Retry packet:
    //#
    //# ff000000010008f067a5502a4262b574 6f6b656e04a265ba2eff4d829058fb3f
    //# 0f2496ba
    #[test]
    fn rfc_retry_vector_test() {
        // ODCID length + ODCID + retry packet without the tag
        let pseudo_packet = hex!(
            "
            088394c8f03e515708
            ff000000010008f067a5502a4262b574 6f6b656e
            "
        );
        let expected_tag = hex!("04a265ba2eff4d829058fb3f0f2496ba");

        assert_eq!(generate_tag(&pseudo_packet), expected_tag);
        assert!(validate(&pseudo_packet, expected_tag).is_ok());

        let mut bad_tag = expected_tag;
        bad_tag[0] ^= 1;
        assert!(validate(&pseudo_packet, bad_tag).is_err());
    }
}
