// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The CRYPTO streams and handshake progression
//!
//! One ordered byte stream per encryption level carries the TLS messages.
//! The transport owns reassembly and retransmission; the TLS session only
//! sees ordered bytes.

use crate::{buffer::ReceiveBuffer, stream::range_set::RangeSet};
use alloc::vec::Vec;
use quell_quic_core::{crypto::EncryptionLevel, transport, transport_error};

//= https://www.rfc-editor.org/rfc/rfc9000#section-7.5
//# Implementations MUST support buffering at least 4096 bytes of data
//# received in out-of-order CRYPTO frames.
const MAX_BUFFERED_CRYPTO: u64 = 64 * 1024;

/// The progression of the handshake
//= https://www.rfc-editor.org/rfc/rfc9001#section-4.1.1
//# the TLS handshake is considered complete when the
//# TLS stack has reported that the handshake is complete.  [...] the
//# handshake is confirmed at the server when the handshake completes.  At
//# the client, the handshake is considered confirmed when a
//# HANDSHAKE_DONE frame is received.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    InProgress,
    Complete,
    Confirmed,
}

/// One ordered CRYPTO byte stream
#[derive(Debug, Default)]
pub struct CryptoStream {
    /// Bytes the TLS session has emitted at this level
    tx: Vec<u8>,
    /// Offsets needing (re)transmission
    tx_pending: RangeSet,
    rx: ReceiveBuffer,
}

impl CryptoStream {
    /// Appends handshake bytes from the TLS session
    pub fn write(&mut self, data: &[u8]) {
        let start = self.tx.len() as u64;
        self.tx.extend_from_slice(data);
        self.tx_pending.insert(start..self.tx.len() as u64);
    }

    /// Returns the next chunk to transmit, at most `max_len` bytes
    pub fn transmit_chunk(&mut self, max_len: u64) -> Option<(u64, Vec<u8>)> {
        if max_len == 0 {
            return None;
        }
        let range = self.tx_pending.pop_min(max_len)?;
        let data = self.tx[range.start as usize..range.end as usize].to_vec();
        Some((range.start, data))
    }

    pub fn is_transmission_pending(&self) -> bool {
        !self.tx_pending.is_empty()
    }

    /// Re-queues a lost CRYPTO frame
    //= https://www.rfc-editor.org/rfc/rfc9000#section-7.5
    //# When packets containing CRYPTO frames are lost [...] data is
    //# retransmitted until it is acknowledged.
    pub fn on_frame_lost(&mut self, offset: u64, len: u64) {
        self.tx_pending.insert(offset..offset + len);
    }

    /// Queues the entire stream for retransmission, e.g. after a Retry
    /// rekeys the Initial space
    pub fn retransmit_all(&mut self) {
        if !self.tx.is_empty() {
            self.tx_pending.insert(0..self.tx.len() as u64);
        }
    }

    /// Admits received CRYPTO bytes, merging duplicates and overlaps
    pub fn on_frame_received(&mut self, offset: u64, data: &[u8]) -> Result<(), transport::Error> {
        let end = offset
            .checked_add(data.len() as u64)
            .ok_or_else(|| transport_error!(FRAME_ENCODING_ERROR, "crypto offset overflow"))?;

        //= https://www.rfc-editor.org/rfc/rfc9000#section-7.5
        //# If an endpoint does not expand its buffer, it MUST close the
        //# connection with a CRYPTO_BUFFER_EXCEEDED error code.
        if end.saturating_sub(self.rx.read_offset()) > MAX_BUFFERED_CRYPTO {
            return Err(transport_error!(
                CRYPTO_BUFFER_EXCEEDED,
                "crypto stream buffer exceeded"
            ));
        }

        self.rx.insert(offset, data);
        Ok(())
    }

    /// Drains the contiguous prefix of received bytes
    pub fn take_received(&mut self) -> Vec<u8> {
        self.rx.take_contiguous()
    }
}

/// The handshake driver: four CRYPTO streams plus the completion state
pub struct Handshake {
    streams: [CryptoStream; 4],
    status: Status,
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            streams: Default::default(),
            status: Status::InProgress,
        }
    }
}

impl Handshake {
    #[inline]
    fn index(level: EncryptionLevel) -> usize {
        match level {
            EncryptionLevel::Initial => 0,
            EncryptionLevel::Handshake => 1,
            EncryptionLevel::ZeroRtt => 2,
            EncryptionLevel::OneRtt => 3,
        }
    }

    #[inline]
    pub fn stream_mut(&mut self, level: EncryptionLevel) -> &mut CryptoStream {
        &mut self.streams[Self::index(level)]
    }

    #[inline]
    pub fn stream(&self, level: EncryptionLevel) -> &CryptoStream {
        &self.streams[Self::index(level)]
    }

    #[inline]
    pub fn status(&self) -> Status {
        self.status
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.status >= Status::Complete
    }

    #[inline]
    pub fn is_confirmed(&self) -> bool {
        self.status == Status::Confirmed
    }

    pub fn on_complete(&mut self) {
        if self.status == Status::InProgress {
            self.status = Status::Complete;
        }
    }

    //= https://www.rfc-editor.org/rfc/rfc9001#section-4.1.2
    //# At the
    //# client, the handshake is considered confirmed when a HANDSHAKE_DONE
    //# frame is received.
    pub fn on_confirmed(&mut self) {
        self.status = Status::Confirmed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crypto_stream_reassembles_out_of_order() {
        let mut stream = CryptoStream::default();
        stream.on_frame_received(6, b"world").unwrap();
        assert!(stream.take_received().is_empty());

        stream.on_frame_received(0, b"hello ").unwrap();
        assert_eq!(stream.take_received(), b"hello world");
    }

    #[test]
    fn crypto_retransmission() {
        let mut stream = CryptoStream::default();
        stream.write(b"client hello");

        let (offset, data) = stream.transmit_chunk(1024).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(data, b"client hello");
        assert!(!stream.is_transmission_pending());

        stream.on_frame_lost(0, 6);
        let (offset, data) = stream.transmit_chunk(1024).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(data, b"client");
    }

    #[test]
    fn crypto_buffer_limit() {
        let mut stream = CryptoStream::default();
        let error = stream
            .on_frame_received(MAX_BUFFERED_CRYPTO + 1, b"x")
            .unwrap_err();
        assert_eq!(error.code, transport::Error::CRYPTO_BUFFER_EXCEEDED);
    }

    #[test]
    fn status_progression() {
        let mut handshake = Handshake::default();
        assert_eq!(handshake.status(), Status::InProgress);
        handshake.on_complete();
        assert!(handshake.is_complete());
        assert!(!handshake.is_confirmed());
        handshake.on_confirmed();
        assert!(handshake.is_confirmed());
    }
}
