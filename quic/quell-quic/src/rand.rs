// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use quell_quic_core::random;
use ring::rand::{SecureRandom, SystemRandom};

/// The OS-backed random generator used for connection ids, reset tokens
/// and path challenges
pub(crate) struct Generator {
    rng: SystemRandom,
}

impl Generator {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl random::Generator for Generator {
    fn fill_secure(&mut self, dest: &mut [u8]) {
        self.rng
            .fill(dest)
            .expect("the system random source is available");
    }

    fn fill(&mut self, dest: &mut [u8]) {
        self.fill_secure(dest)
    }
}
