// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Pluggable TLS sessions
//!
//! The transport drives an external TLS 1.3 engine through the
//! `quell_quic_transport::tls::Session` contract. A `Provider` constructs
//! one session per connection.

use quell_quic_core::endpoint;
use quell_quic_transport::tls;

/// Builds a TLS session for each new connection
pub trait Provider: Send + Sync + 'static {
    /// `server_name` carries the SNI value on clients
    fn new_session(
        &self,
        endpoint_type: endpoint::Type,
        server_name: Option<&str>,
    ) -> Box<dyn tls::Session>;

    /// The ALPN protocols this endpoint offers
    fn application_protocols(&self) -> Vec<Vec<u8>>;
}

/// The deterministic in-memory session, suitable for tests and local
/// experimentation only: it performs no authentication.
#[cfg(feature = "unstable-provider-tls-testing")]
pub mod testing {
    use super::*;

    #[derive(Clone, Copy, Debug, Default)]
    pub struct Provider;

    impl super::Provider for Provider {
        fn new_session(
            &self,
            endpoint_type: endpoint::Type,
            _server_name: Option<&str>,
        ) -> Box<dyn tls::Session> {
            Box::new(tls::testing::Session::new(endpoint_type))
        }

        fn application_protocols(&self) -> Vec<Vec<u8>> {
            vec![b"quell-test".to_vec()]
        }
    }
}
