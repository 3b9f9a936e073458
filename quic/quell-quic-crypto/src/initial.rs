// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use crate::{secret, Secret};
use quell_quic_core::crypto::{initial, CipherSuite};
use ring::hkdf;

//= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
//# Initial packets are protected with a secret derived from the
//# Destination Connection ID field from the client's first Initial
//# packet of the connection.
//#
//# initial_secret = HKDF-Extract(initial_salt,
//#                               client_dst_connection_id)
//#
//# client_initial_secret = HKDF-Expand-Label(initial_secret,
//#                                           "client in", "",
//#                                           Hash.length)
//# server_initial_secret = HKDF-Expand-Label(initial_secret,
//#                                           "server in", "",
//#                                           Hash.length)

/// Derives the client and server Initial traffic secrets from the
/// client's first Destination Connection ID
pub fn initial_secrets(client_dcid: &[u8]) -> (Secret, Secret) {
    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
    //# The hash function for HKDF when deriving initial secrets and keys is
    //# SHA-256 [SHA].
    let salt = hkdf::Salt::new(hkdf::HKDF_SHA256, &initial::INITIAL_SALT);
    let prk = salt.extract(client_dcid);

    let client = secret::expand(&prk, &initial::INITIAL_CLIENT_LABEL, 32);
    let server = secret::expand(&prk, &initial::INITIAL_SERVER_LABEL, 32);

    //= https://www.rfc-editor.org/rfc/rfc9001#section-5.2
    //# Initial packets use AEAD_AES_128_GCM with keys derived from the
    //# Destination Connection ID field of the first Initial packet sent
    //# by the client
    (
        Secret::new(CipherSuite::Aes128GcmSha256, &client),
        Secret::new(CipherSuite::Aes128GcmSha256, &server),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use quell_quic_core::crypto::initial::{
        EXAMPLE_CLIENT_INITIAL_HP, EXAMPLE_CLIENT_INITIAL_IV, EXAMPLE_CLIENT_INITIAL_KEY,
        EXAMPLE_CLIENT_INITIAL_SECRET, EXAMPLE_DCID, EXAMPLE_SERVER_INITIAL_SECRET,
    };

    //= https://www.rfc-editor.org/rfc/rfc9001#appendix-A.1
    //= type=test
    //# client_initial_secret
    //#     = HKDF-Expand-Label(initial_secret, "client in", "", 32)
    //#     = c00cf151ca5be075ed0ebfb5c80323c4
    //#       2d6b7db67881289af4008f1f6c357aea
    #[test]
    fn key_schedule_vectors_test() {
        let (client, server) = initial_secrets(&EXAMPLE_DCID);

        assert_eq!(client.as_slice(), EXAMPLE_CLIENT_INITIAL_SECRET);
        assert_eq!(server.as_slice(), EXAMPLE_SERVER_INITIAL_SECRET);

        assert_eq!(
            client.expand_label(b"quic key", 16).as_slice(),
            EXAMPLE_CLIENT_INITIAL_KEY
        );
        assert_eq!(
            client.expand_label(b"quic iv", 12).as_slice(),
            EXAMPLE_CLIENT_INITIAL_IV
        );
        assert_eq!(
            client.expand_label(b"quic hp", 16).as_slice(),
            EXAMPLE_CLIENT_INITIAL_HP
        );
    }

    /// The server's opener must recover what the client's sealer protects
    #[test]
    fn initial_round_trip_test() {
        use quell_quic_core::{
            crypto::{self, Key as _},
            endpoint,
            packet::number::PacketNumberSpace,
        };

        let client = crate::KeyPair::new_initial(endpoint::Type::Client, &EXAMPLE_DCID);
        let server = crate::KeyPair::new_initial(endpoint::Type::Server, &EXAMPLE_DCID);

        let header = [0xc3u8, 0, 0, 0, 1];
        let payload = b"crypto frame bytes";

        let mut sealed = payload.to_vec();
        sealed.extend_from_slice(&[0; 16]);
        client.sealer.packet.encrypt(0, &header, &mut sealed).unwrap();

        let len = server.opener.packet.decrypt(0, &header, &mut sealed).unwrap();
        assert_eq!(&sealed[..len], payload);

        // header protection round-trips between the pair as well
        let mut packet = [0u8; 64];
        packet[0] = 0xc1;
        let pn_offset = 18;
        crypto::apply_header_protection(&client.sealer.header, &mut packet, pn_offset, 2)
            .unwrap();
        let truncated = crypto::remove_header_protection(
            PacketNumberSpace::Initial,
            &server.opener.header,
            &mut packet,
            pn_offset,
        )
        .unwrap();
        assert_eq!(truncated.len().bytesize(), 2);
        assert_eq!(packet[0], 0xc1);
    }
}
