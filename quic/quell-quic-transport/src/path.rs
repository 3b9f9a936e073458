// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Path state and validation
//!
//! Every (local, remote) address pair used by the connection is tracked as
//! a path. New paths start unvalidated: a PATH_CHALLENGE is sent on them
//! and non-probing packets continue on the primary path until the peer
//! echoes the challenge.

use alloc::vec::Vec;
use quell_quic_core::{
    frame::path_challenge::DATA_LEN,
    random,
    time::{Duration, Timestamp},
};
use std::net::SocketAddr;

//= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
//# Prior to validating the client address, servers MUST NOT send more
//# than three times as many bytes as the number of bytes they have
//# received.
pub const AMPLIFICATION_FACTOR: u64 = 3;

/// Number of times a challenge is retried before the path is abandoned
const CHALLENGE_RETRIES: u8 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// No validation has been attempted
    Unknown,
    /// A PATH_CHALLENGE is outstanding
    Validating,
    /// The peer echoed the challenge data on this path
    Validated,
    /// The retry budget was exhausted
    Failed,
    Abandoned,
}

#[derive(Debug)]
pub struct Path {
    pub remote_address: SocketAddr,
    pub state: State,
    /// Data of the outstanding PATH_CHALLENGE
    challenge: Option<[u8; DATA_LEN]>,
    /// True while the challenge frame awaits transmission
    challenge_pending: bool,
    challenge_retries: u8,
    /// When the outstanding challenge times out
    pub challenge_deadline: Option<Timestamp>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub last_validated: Option<Timestamp>,
}

impl Path {
    fn new(remote_address: SocketAddr) -> Self {
        Self {
            remote_address,
            state: State::Unknown,
            challenge: None,
            challenge_pending: false,
            challenge_retries: 0,
            challenge_deadline: None,
            bytes_sent: 0,
            bytes_received: 0,
            last_validated: None,
        }
    }

    /// The number of bytes this path may still carry before validation
    //= https://www.rfc-editor.org/rfc/rfc9000#section-8.1
    //# Prior to validating the client address, servers MUST NOT send more
    //# than three times as many bytes as the number of bytes they have
    //# received.
    pub fn amplification_credit(&self, enforce: bool) -> u64 {
        if !enforce || self.state == State::Validated {
            return u64::MAX;
        }
        (self.bytes_received * AMPLIFICATION_FACTOR).saturating_sub(self.bytes_sent)
    }

    /// Starts (or restarts) validation with fresh challenge data
    pub fn start_validation<R: random::Generator + ?Sized>(
        &mut self,
        random: &mut R,
        now: Timestamp,
        timeout: Duration,
    ) {
        let mut data = [0; DATA_LEN];
        random.fill_secure(&mut data);
        self.challenge = Some(data);
        self.challenge_pending = true;
        self.challenge_deadline = Some(now + timeout);
        self.state = State::Validating;
    }

    /// Takes the challenge data to transmit, if one is queued
    pub fn take_pending_challenge(&mut self) -> Option<[u8; DATA_LEN]> {
        if self.challenge_pending {
            self.challenge_pending = false;
            self.challenge
        } else {
            None
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9000#section-8.2.3
    //# Path validation succeeds when a PATH_RESPONSE frame is received that
    //# contains the data that was sent in a previous PATH_CHALLENGE frame.
    pub fn on_path_response(&mut self, data: &[u8; DATA_LEN], now: Timestamp) -> bool {
        if self.challenge.as_ref() == Some(data) {
            self.state = State::Validated;
            self.challenge = None;
            self.challenge_pending = false;
            self.challenge_deadline = None;
            self.last_validated = Some(now);
            true
        } else {
            // a response that does not match the outstanding challenge
            // does not validate the path
            false
        }
    }

    /// Handles the challenge timer firing; retries until the budget runs
    /// out
    pub fn on_challenge_timeout<R: random::Generator + ?Sized>(
        &mut self,
        random: &mut R,
        now: Timestamp,
        timeout: Duration,
    ) {
        if self.state != State::Validating {
            return;
        }
        self.challenge_retries += 1;
        if self.challenge_retries > CHALLENGE_RETRIES {
            self.state = State::Failed;
            self.challenge = None;
            self.challenge_deadline = None;
        } else {
            self.start_validation(random, now, timeout);
        }
    }
}

/// The set of paths for one connection
pub struct Manager {
    paths: Vec<Path>,
    primary: usize,
    /// Servers enforce the anti-amplification bound until the path is
    /// validated
    enforce_amplification: bool,
}

impl Manager {
    pub fn new(remote_address: SocketAddr, is_server: bool) -> Self {
        let mut path = Path::new(remote_address);
        if !is_server {
            // the client validated the server's address by completing the
            // handshake address check in the other direction
            path.state = State::Validated;
        }
        Self {
            paths: alloc::vec![path],
            primary: 0,
            enforce_amplification: is_server,
        }
    }

    pub fn primary(&self) -> &Path {
        &self.paths[self.primary]
    }

    pub fn primary_mut(&mut self) -> &mut Path {
        &mut self.paths[self.primary]
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Path> {
        self.paths.iter_mut()
    }

    /// Records an inbound datagram, creating a path for a new remote
    /// address. Returns true if the address was previously unknown.
    pub fn on_datagram_received<R: random::Generator + ?Sized>(
        &mut self,
        remote_address: SocketAddr,
        bytes: usize,
        random: &mut R,
        now: Timestamp,
        challenge_timeout: Duration,
    ) -> bool {
        if let Some(path) = self
            .paths
            .iter_mut()
            .find(|path| path.remote_address == remote_address)
        {
            path.bytes_received += bytes as u64;
            return false;
        }

        //= https://www.rfc-editor.org/rfc/rfc9000#section-9.3
        //# An endpoint MUST
        //# perform path validation (Section 8.2) if it detects any change to a
        //# peer's address
        let mut path = Path::new(remote_address);
        path.bytes_received = bytes as u64;
        path.start_validation(random, now, challenge_timeout);
        self.paths.push(path);
        true
    }

    /// Marks the primary path as having validated the peer (e.g. a client
    /// Initial carried a valid token, or the handshake progressed)
    pub fn on_peer_validated(&mut self) {
        let path = &mut self.paths[self.primary];
        if path.state != State::Validated {
            path.state = State::Validated;
        }
    }

    /// Handles a PATH_RESPONSE received from `remote_address`.
    ///
    /// The new path becomes primary only when the peer has spare
    /// connection ids to use on it.
    pub fn on_path_response(
        &mut self,
        remote_address: SocketAddr,
        data: &[u8; DATA_LEN],
        now: Timestamp,
        peer_has_unused_ids: bool,
    ) -> bool {
        let Some(index) = self
            .paths
            .iter()
            .position(|path| path.remote_address == remote_address)
        else {
            return false;
        };

        //= https://www.rfc-editor.org/rfc/rfc9000#section-8.2.2
        //# This requirement MUST NOT be enforced by the endpoint that
        //# initiates path validation, as that would enable an attack on
        //# migration; see Section 9.3.3.  [the response must arrive on the
        //# same path]
        if !self.paths[index].on_path_response(data, now) {
            return false;
        }

        if index != self.primary && peer_has_unused_ids {
            self.primary = index;
        }
        true
    }

    /// The earliest outstanding challenge deadline
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.paths
            .iter()
            .filter_map(|path| path.challenge_deadline)
            .min()
    }

    pub fn on_timeout<R: random::Generator + ?Sized>(
        &mut self,
        random: &mut R,
        now: Timestamp,
        challenge_timeout: Duration,
    ) {
        for path in &mut self.paths {
            if path
                .challenge_deadline
                .map_or(false, |deadline| deadline <= now)
            {
                path.on_challenge_timeout(random, now, challenge_timeout);
            }
        }
        self.paths
            .retain(|path| path.state != State::Failed || path.bytes_received == 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quell_quic_core::random::testing;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn timestamp(millis: u64) -> Timestamp {
        Timestamp::from_duration(Duration::from_millis(millis))
    }

    #[test]
    fn response_must_match_challenge() {
        let mut random = testing::Generator::default();
        let mut path = Path::new(addr(4433));
        path.start_validation(&mut random, timestamp(0), Duration::from_secs(1));

        let challenge = path.take_pending_challenge().unwrap();

        let mut wrong = challenge;
        wrong[0] ^= 1;
        assert!(!path.on_path_response(&wrong, timestamp(1)));
        assert_eq!(path.state, State::Validating);

        assert!(path.on_path_response(&challenge, timestamp(2)));
        assert_eq!(path.state, State::Validated);
    }

    #[test]
    fn amplification_limit() {
        let mut manager = Manager::new(addr(4433), true);
        let mut random = testing::Generator::default();

        manager.on_datagram_received(
            addr(4433),
            100,
            &mut random,
            timestamp(0),
            Duration::from_secs(1),
        );

        let path = manager.primary_mut();
        path.bytes_sent = 250;
        assert_eq!(path.amplification_credit(true), 50);

        path.bytes_sent = 300;
        assert_eq!(path.amplification_credit(true), 0);

        path.state = State::Validated;
        assert_eq!(path.amplification_credit(true), u64::MAX);
    }

    #[test]
    fn migration_requires_unused_ids() {
        let mut manager = Manager::new(addr(1), false);
        let mut random = testing::Generator::default();

        assert!(manager.on_datagram_received(
            addr(2),
            1200,
            &mut random,
            timestamp(0),
            Duration::from_secs(1),
        ));

        let challenge = manager
            .iter_mut()
            .find(|path| path.remote_address == addr(2))
            .unwrap()
            .take_pending_challenge()
            .unwrap();

        // without spare connection ids the path validates but does not
        // become primary
        assert!(manager.on_path_response(addr(2), &challenge, timestamp(1), false));
        assert_eq!(manager.primary().remote_address, addr(1));
    }

    #[test]
    fn challenge_retry_budget() {
        let mut random = testing::Generator::default();
        let mut path = Path::new(addr(9));
        path.start_validation(&mut random, timestamp(0), Duration::from_millis(100));

        for attempt in 0..CHALLENGE_RETRIES {
            path.on_challenge_timeout(&mut random, timestamp(100 * (attempt as u64 + 1)), Duration::from_millis(100));
            assert_eq!(path.state, State::Validating);
        }

        path.on_challenge_timeout(&mut random, timestamp(1000), Duration::from_millis(100));
        assert_eq!(path.state, State::Failed);
    }
}
