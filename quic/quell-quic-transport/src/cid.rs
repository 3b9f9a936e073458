// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Connection id registries
//!
//! The local registry issues connection ids the peer may route to us,
//! paired with stateless reset tokens. The peer registry stores ids the
//! peer issued for our use, bounded by our active_connection_id_limit.

use alloc::vec::Vec;
use quell_quic_core::{
    connection::{ConnectionId, StatelessResetToken},
    frame::NewConnectionId,
    random,
    transport, transport_error,
    varint::VarInt,
};

/// An id we issued to the peer
#[derive(Clone, Debug)]
pub struct LocalId {
    pub sequence_number: VarInt,
    pub id: ConnectionId,
    pub stateless_reset_token: StatelessResetToken,
    /// True while the NEW_CONNECTION_ID frame announcing it needs
    /// (re)transmission
    pub pending_transmission: bool,
}

/// Issues and retires the connection ids this endpoint advertises
pub struct LocalIdRegistry {
    ids: Vec<LocalId>,
    next_sequence: u64,
    cid_len: usize,
}

impl LocalIdRegistry {
    /// Creates the registry seeded with the handshake-negotiated id, which
    /// implicitly has sequence number 0
    //= https://www.rfc-editor.org/rfc/rfc9000#section-5.1.1
    //# The initial connection ID issued by an endpoint is sent in the Source
    //# Connection ID field of the long packet header (Section 17.2) during
    //# the handshake.  The sequence number of the initial connection ID is 0.
    pub fn new(handshake_id: ConnectionId) -> Self {
        Self {
            ids: alloc::vec![LocalId {
                sequence_number: VarInt::ZERO,
                id: handshake_id,
                stateless_reset_token: StatelessResetToken::ZEROED,
                pending_transmission: false,
            }],
            next_sequence: 1,
            cid_len: handshake_id.len(),
        }
    }

    /// The id the peer currently addresses us with
    pub fn active_id(&self) -> &ConnectionId {
        &self.ids.first().expect("at least one id is always live").id
    }

    pub fn cid_len(&self) -> usize {
        self.cid_len
    }

    /// Issues new ids until the peer's active_connection_id_limit is
    /// filled
    pub fn issue<R: random::Generator + ?Sized>(
        &mut self,
        peer_limit: VarInt,
        random: &mut R,
    ) {
        // zero-length ids cannot be rotated; the peer routes by address
        if self.cid_len == 0 {
            return;
        }

        let limit = peer_limit.as_u64().min(8) as usize;
        while self.ids.len() < limit {
            let id = ConnectionId::generate(random, self.cid_len);
            let token = StatelessResetToken::generate(random);
            let sequence_number = VarInt::new(self.next_sequence)
                .expect("sequence numbers stay far below the varint limit");
            self.next_sequence += 1;
            self.ids.push(LocalId {
                sequence_number,
                id,
                stateless_reset_token: token,
                pending_transmission: true,
            });
        }
    }

    /// Ids whose NEW_CONNECTION_ID frames are waiting to be sent
    pub fn pending_transmissions(&mut self) -> Vec<NewConnectionId> {
        let mut frames = Vec::new();
        for local in &mut self.ids {
            if local.pending_transmission {
                local.pending_transmission = false;
                frames.push(NewConnectionId {
                    sequence_number: local.sequence_number,
                    retire_prior_to: VarInt::ZERO,
                    connection_id: local.id,
                    stateless_reset_token: local.stateless_reset_token,
                });
            }
        }
        frames
    }

    /// Re-queues a NEW_CONNECTION_ID frame after loss
    pub fn on_new_connection_id_lost(&mut self, sequence_number: VarInt) {
        for local in &mut self.ids {
            if local.sequence_number == sequence_number {
                local.pending_transmission = true;
            }
        }
    }

    /// Handles a RETIRE_CONNECTION_ID frame from the peer
    //= https://www.rfc-editor.org/rfc/rfc9000#section-19.16
    //# Receipt of a RETIRE_CONNECTION_ID frame containing a sequence number
    //# greater than any previously sent to the peer MUST be treated as a
    //# connection error of type PROTOCOL_VIOLATION.
    pub fn on_retire_connection_id(
        &mut self,
        sequence_number: VarInt,
    ) -> Result<(), transport::Error> {
        if sequence_number.as_u64() >= self.next_sequence {
            return Err(transport_error!(
                PROTOCOL_VIOLATION,
                "retirement of an unissued connection id"
            ));
        }

        // the last live id is never dropped; the peer must provide a
        // replacement before retiring it
        let must_keep = self.ids.len() == 1;
        self.ids
            .retain(|local| local.sequence_number != sequence_number || must_keep);
        Ok(())
    }

    /// Returns true if `id` is one of ours
    pub fn is_local(&self, id: &ConnectionId) -> bool {
        self.ids.iter().any(|local| &local.id == id)
    }

    /// Every id currently routable to this connection
    pub fn ids(&self) -> impl Iterator<Item = &ConnectionId> {
        self.ids.iter().map(|local| &local.id)
    }
}

/// An id issued to us by the peer
#[derive(Clone, Debug)]
struct PeerId {
    sequence_number: VarInt,
    id: ConnectionId,
    stateless_reset_token: Option<StatelessResetToken>,
    in_use: bool,
}

/// Stores the connection ids the peer has issued for our use
pub struct PeerIdRegistry {
    ids: Vec<PeerId>,
    /// Our active_connection_id_limit transport parameter
    limit: VarInt,
    retire_prior_to: VarInt,
    /// RETIRE_CONNECTION_ID frames waiting to be sent
    pending_retirement: Vec<VarInt>,
}

impl PeerIdRegistry {
    /// Creates the registry with the id learned during the handshake
    /// (sequence number 0)
    pub fn new(initial_id: ConnectionId, limit: VarInt) -> Self {
        Self {
            ids: alloc::vec![PeerId {
                sequence_number: VarInt::ZERO,
                id: initial_id,
                stateless_reset_token: None,
                in_use: true,
            }],
            limit,
            retire_prior_to: VarInt::ZERO,
            pending_retirement: Vec::new(),
        }
    }

    /// The id to put in the destination field of outgoing short packets
    pub fn active_id(&self) -> &ConnectionId {
        &self
            .ids
            .iter()
            .find(|peer| peer.in_use)
            .expect("one peer id is always in use")
            .id
    }

    /// Replaces the sequence-0 placeholder when the server's handshake SCID
    /// differs from what the client guessed
    pub fn on_handshake_id_update(&mut self, id: ConnectionId) {
        if let Some(first) = self.ids.first_mut() {
            first.id = id;
        }
    }

    /// Returns true if an unused id is available for a path migration
    pub fn has_unused(&self) -> bool {
        self.ids
            .iter()
            .any(|peer| !peer.in_use && peer.sequence_number >= self.retire_prior_to)
    }

    /// Handles a NEW_CONNECTION_ID frame
    pub fn on_new_connection_id(
        &mut self,
        frame: &NewConnectionId,
    ) -> Result<(), transport::Error> {
        //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
        //# [...] receipt of the same frame multiple times MUST NOT be treated
        //# as a connection error.  A receiver can use the sequence number
        //# supplied in the NEW_CONNECTION_ID frame to handle receiving the
        //# same NEW_CONNECTION_ID frame multiple times.
        if let Some(existing) = self
            .ids
            .iter()
            .find(|peer| peer.sequence_number == frame.sequence_number)
        {
            //= https://www.rfc-editor.org/rfc/rfc9000#section-19.15
            //# If an endpoint receives a NEW_CONNECTION_ID frame that repeats a
            //# previously issued connection ID with a different Stateless Reset
            //# Token field value or a different Sequence Number field value
            //# [...] the endpoint MAY treat that receipt as a connection error
            //# of type PROTOCOL_VIOLATION.
            if existing.id != frame.connection_id {
                return Err(transport_error!(
                    PROTOCOL_VIOLATION,
                    "sequence number reused for a different connection id"
                ));
            }
            return Ok(());
        }

        if frame.retire_prior_to > self.retire_prior_to {
            self.retire_prior_to = frame.retire_prior_to;

            //= https://www.rfc-editor.org/rfc/rfc9000#section-5.1.2
            //# Upon receipt of an increased Retire Prior To field, the peer MUST
            //# stop using the corresponding connection IDs and retire them with
            //# RETIRE_CONNECTION_ID frames
            for peer in &mut self.ids {
                if peer.sequence_number < self.retire_prior_to {
                    peer.in_use = false;
                    self.pending_retirement.push(peer.sequence_number);
                }
            }
            self.ids
                .retain(|peer| peer.sequence_number >= self.retire_prior_to);
        }

        if frame.sequence_number < self.retire_prior_to {
            // already retired on arrival
            self.pending_retirement.push(frame.sequence_number);
            return Ok(());
        }

        self.ids.push(PeerId {
            sequence_number: frame.sequence_number,
            id: frame.connection_id,
            stateless_reset_token: Some(frame.stateless_reset_token),
            in_use: self.ids.is_empty(),
        });

        //= https://www.rfc-editor.org/rfc/rfc9000#section-5.1.1
        //# After processing a NEW_CONNECTION_ID frame and adding and retiring
        //# active connection IDs, if the number of active connection IDs
        //# exceeds the value advertised in its active_connection_id_limit
        //# transport parameter, an endpoint MUST close the connection with an
        //# error of type CONNECTION_ID_LIMIT_ERROR.
        if self.ids.len() as u64 > self.limit.as_u64() {
            return Err(transport_error!(
                CONNECTION_ID_LIMIT_ERROR,
                "peer exceeded active_connection_id_limit"
            ));
        }

        if !self.ids.iter().any(|peer| peer.in_use) {
            if let Some(first) = self.ids.first_mut() {
                first.in_use = true;
            }
        }

        Ok(())
    }

    /// Switches to an unused id, e.g. when validating a new path
    pub fn use_unused_id(&mut self) -> Option<ConnectionId> {
        let current = self.ids.iter().position(|peer| peer.in_use)?;
        let next = self
            .ids
            .iter()
            .position(|peer| !peer.in_use && peer.sequence_number >= self.retire_prior_to)?;

        let retired_sequence = self.ids[current].sequence_number;
        self.ids[current].in_use = false;
        self.pending_retirement.push(retired_sequence);
        self.ids.remove(current);

        let next = next - usize::from(next > current);
        self.ids[next].in_use = true;
        Some(self.ids[next].id)
    }

    /// Sequence numbers whose RETIRE_CONNECTION_ID frames await
    /// transmission
    pub fn pending_retirements(&mut self) -> Vec<VarInt> {
        core::mem::take(&mut self.pending_retirement)
    }

    pub fn on_retire_connection_id_lost(&mut self, sequence_number: VarInt) {
        self.pending_retirement.push(sequence_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quell_quic_core::random::{testing, Generator as _};

    fn new_cid_frame(sequence: u8, byte: u8) -> NewConnectionId {
        NewConnectionId {
            sequence_number: VarInt::from_u8(sequence),
            retire_prior_to: VarInt::ZERO,
            connection_id: ConnectionId::try_from_slice(&[byte; 8]).unwrap(),
            stateless_reset_token: StatelessResetToken::new([byte; 16]),
        }
    }

    #[test]
    fn local_registry_issues_up_to_limit() {
        let mut random = testing::Generator::default();
        let mut registry =
            LocalIdRegistry::new(ConnectionId::generate(&mut random, 8));

        registry.issue(VarInt::from_u8(4), &mut random);
        let frames = registry.pending_transmissions();
        assert_eq!(frames.len(), 3);

        // issuing again adds nothing new
        registry.issue(VarInt::from_u8(4), &mut random);
        assert!(registry.pending_transmissions().is_empty());
    }

    #[test]
    fn retire_unissued_id_is_violation() {
        let mut random = testing::Generator::default();
        let mut registry =
            LocalIdRegistry::new(ConnectionId::generate(&mut random, 8));

        assert!(registry
            .on_retire_connection_id(VarInt::from_u8(9))
            .is_err());
    }

    #[test]
    fn peer_registry_duplicate_sequence() {
        let mut registry = PeerIdRegistry::new(
            ConnectionId::try_from_slice(&[1; 8]).unwrap(),
            VarInt::from_u8(4),
        );

        registry.on_new_connection_id(&new_cid_frame(1, 2)).unwrap();
        // the identical frame again is fine
        registry.on_new_connection_id(&new_cid_frame(1, 2)).unwrap();
        // the same sequence with a different id is not
        assert!(registry.on_new_connection_id(&new_cid_frame(1, 3)).is_err());
    }

    #[test]
    fn peer_registry_limit() {
        let mut registry = PeerIdRegistry::new(
            ConnectionId::try_from_slice(&[1; 8]).unwrap(),
            VarInt::from_u8(2),
        );

        registry.on_new_connection_id(&new_cid_frame(1, 2)).unwrap();
        let error = registry
            .on_new_connection_id(&new_cid_frame(2, 3))
            .unwrap_err();
        assert_eq!(error.code, transport::Error::CONNECTION_ID_LIMIT_ERROR);
    }

    #[test]
    fn use_unused_id_retires_current() {
        let mut registry = PeerIdRegistry::new(
            ConnectionId::try_from_slice(&[1; 8]).unwrap(),
            VarInt::from_u8(4),
        );
        registry.on_new_connection_id(&new_cid_frame(1, 2)).unwrap();

        assert!(registry.has_unused());
        let id = registry.use_unused_id().unwrap();
        assert_eq!(id.as_slice(), &[2; 8]);
        assert_eq!(registry.pending_retirements(), alloc::vec![VarInt::ZERO]);
        assert!(!registry.has_unused());
    }

    #[test]
    fn deterministic_generator_is_stable() {
        let mut a = testing::Generator::default();
        let mut b = testing::Generator::default();
        let mut buf_a = [0u8; 8];
        let mut buf_b = [0u8; 8];
        a.fill(&mut buf_a);
        b.fill(&mut buf_b);
        assert_eq!(buf_a, buf_b);
    }
}
