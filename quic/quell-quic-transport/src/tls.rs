// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The contract between the transport and an external TLS 1.3 engine
//!
//! The transport does not implement the TLS record layer. It feeds the
//! session CRYPTO-frame bytes per encryption level, and the session calls
//! back into the `Context` to emit its own handshake bytes, install traffic
//! secrets and report completion.

use alloc::vec::Vec;
use quell_quic_core::{crypto::EncryptionLevel, transport};
use quell_quic_crypto::Secret;

/// The traffic secrets for one encryption level
pub struct Secrets {
    /// Protects data this endpoint sends
    pub local: Secret,
    /// Protects data the peer sends
    pub peer: Secret,
}

/// Callbacks the TLS session uses to publish progress to the transport
pub trait Context {
    /// Emit handshake bytes at the given level
    fn send_handshake_data(&mut self, level: EncryptionLevel, data: &[u8]);

    /// Install the traffic secrets for a level
    fn install_secrets(&mut self, level: EncryptionLevel, secrets: Secrets);

    /// The local transport parameters, already encoded, for the session to
    /// carry in its handshake messages
    fn local_transport_parameters(&mut self) -> Vec<u8>;

    /// The peer's encoded transport parameters were received
    fn on_peer_transport_parameters(&mut self, encoded: &[u8]);

    /// The handshake has completed locally
    fn on_handshake_complete(&mut self);

    /// The negotiated application protocol, if any
    fn on_application_protocol(&mut self, protocol: &[u8]);
}

/// An external TLS 1.3 state machine, driven by CRYPTO stream bytes
pub trait Session: Send {
    /// Called once when the connection starts, letting a client session
    /// emit its first flight
    fn start(&mut self, context: &mut dyn Context) -> Result<(), transport::Error>;

    /// Feeds ordered CRYPTO bytes received at `level`
    fn on_handshake_data(
        &mut self,
        level: EncryptionLevel,
        data: &[u8],
        context: &mut dyn Context,
    ) -> Result<(), transport::Error>;

    /// Returns true once the session has reported completion
    fn is_complete(&self) -> bool;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    //! A deterministic in-memory session exercising the `Session` contract
    //!
    //! The "handshake" exchanges length-prefixed messages carrying the
    //! transport parameters and derives traffic secrets from the server
    //! hello, so both sides compute identical keys without a record layer.

    use super::*;
    use alloc::vec::Vec;
    use quell_quic_core::endpoint;
    use quell_quic_crypto::initial::initial_secrets;

    const CLIENT_HELLO: u8 = 1;
    const SERVER_HELLO: u8 = 2;
    const SERVER_FINISHED: u8 = 3;
    const CLIENT_FINISHED: u8 = 4;

    const TEST_PROTOCOL: &[u8] = b"quell-test";

    fn frame_message(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut message = Vec::with_capacity(3 + body.len());
        message.push(tag);
        message.extend_from_slice(&(body.len() as u16).to_be_bytes());
        message.extend_from_slice(body);
        message
    }

    fn derive_secrets(seed: &[u8], label: &[u8]) -> (quell_quic_crypto::Secret, quell_quic_crypto::Secret) {
        let mut input = Vec::with_capacity(seed.len() + label.len());
        input.extend_from_slice(seed);
        input.extend_from_slice(label);
        initial_secrets(&input)
    }

    /// A deterministic TLS stand-in
    pub struct Session {
        endpoint_type: endpoint::Type,
        /// Partial message bytes per level
        buffers: [Vec<u8>; 2],
        /// The server-hello body, seeding key derivation
        seed: Option<Vec<u8>>,
        complete: bool,
    }

    impl Session {
        pub fn new(endpoint_type: endpoint::Type) -> Self {
            Self {
                endpoint_type,
                buffers: [Vec::new(), Vec::new()],
                seed: None,
                complete: false,
            }
        }

        fn buffer_index(level: EncryptionLevel) -> usize {
            match level {
                EncryptionLevel::Initial => 0,
                _ => 1,
            }
        }

        fn install(
            &mut self,
            level: EncryptionLevel,
            context: &mut dyn Context,
        ) -> Result<(), transport::Error> {
            let seed = self
                .seed
                .as_ref()
                .ok_or_else(|| transport::Error::crypto_error(80, "keys requested before hello"))?;
            let label: &[u8] = match level {
                EncryptionLevel::Handshake => b"hs",
                EncryptionLevel::OneRtt => b"app",
                _ => return Ok(()),
            };
            let (client, server) = derive_secrets(seed, label);
            let (local, peer) = match self.endpoint_type {
                endpoint::Type::Client => (client, server),
                endpoint::Type::Server => (server, client),
            };
            context.install_secrets(level, Secrets { local, peer });
            Ok(())
        }

        fn on_message(
            &mut self,
            level: EncryptionLevel,
            tag: u8,
            body: &[u8],
            context: &mut dyn Context,
        ) -> Result<(), transport::Error> {
            match (self.endpoint_type, tag, level) {
                (endpoint::Type::Server, CLIENT_HELLO, EncryptionLevel::Initial) => {
                    context.on_peer_transport_parameters(body);

                    let params = context.local_transport_parameters();
                    context.send_handshake_data(
                        EncryptionLevel::Initial,
                        &frame_message(SERVER_HELLO, &params),
                    );

                    self.seed = Some(params);
                    self.install(EncryptionLevel::Handshake, context)?;
                    context.send_handshake_data(
                        EncryptionLevel::Handshake,
                        &frame_message(SERVER_FINISHED, &[]),
                    );
                    self.install(EncryptionLevel::OneRtt, context)?;
                    Ok(())
                }
                (endpoint::Type::Client, SERVER_HELLO, EncryptionLevel::Initial) => {
                    context.on_peer_transport_parameters(body);
                    self.seed = Some(body.to_vec());
                    self.install(EncryptionLevel::Handshake, context)?;
                    Ok(())
                }
                (endpoint::Type::Client, SERVER_FINISHED, EncryptionLevel::Handshake) => {
                    context.send_handshake_data(
                        EncryptionLevel::Handshake,
                        &frame_message(CLIENT_FINISHED, &[]),
                    );
                    self.install(EncryptionLevel::OneRtt, context)?;
                    self.complete = true;
                    context.on_application_protocol(TEST_PROTOCOL);
                    context.on_handshake_complete();
                    Ok(())
                }
                (endpoint::Type::Server, CLIENT_FINISHED, EncryptionLevel::Handshake) => {
                    self.complete = true;
                    context.on_application_protocol(TEST_PROTOCOL);
                    context.on_handshake_complete();
                    Ok(())
                }
                _ => Err(transport::Error::crypto_error(10, "unexpected handshake message")),
            }
        }
    }

    impl super::Session for Session {
        fn start(&mut self, context: &mut dyn Context) -> Result<(), transport::Error> {
            if self.endpoint_type.is_client() {
                let params = context.local_transport_parameters();
                context.send_handshake_data(
                    EncryptionLevel::Initial,
                    &frame_message(CLIENT_HELLO, &params),
                );
            }
            Ok(())
        }

        fn on_handshake_data(
            &mut self,
            level: EncryptionLevel,
            data: &[u8],
            context: &mut dyn Context,
        ) -> Result<(), transport::Error> {
            let index = Self::buffer_index(level);
            self.buffers[index].extend_from_slice(data);

            loop {
                let buffer = &self.buffers[index];
                if buffer.len() < 3 {
                    return Ok(());
                }
                let tag = buffer[0];
                let len = u16::from_be_bytes([buffer[1], buffer[2]]) as usize;
                if buffer.len() < 3 + len {
                    return Ok(());
                }

                let body: Vec<u8> = buffer[3..3 + len].to_vec();
                self.buffers[index].drain(..3 + len);
                self.on_message(level, tag, &body, context)?;
            }
        }

        fn is_complete(&self) -> bool {
            self.complete
        }
    }
}
