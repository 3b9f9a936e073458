// Copyright The quell project authors. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Ordered reassembly of an offset-indexed byte stream
//!
//! Used by both the CRYPTO streams and stream data reception. Duplicate and
//! overlapping segments are admitted idempotently; the reader observes the
//! longest prefix contiguous from offset zero.

use alloc::{collections::BTreeMap, vec::Vec};

//= https://www.rfc-editor.org/rfc/rfc9000#section-2.2
//# QUIC makes no specific allowances for delivery of stream data out of
//# order.  However, implementations MAY choose to offer the ability to
//# deliver data out of order to a receiving application.

/// An out-of-order segment set delivering bytes in offset order
#[derive(Debug, Default)]
pub struct ReceiveBuffer {
    /// Segments above `read_offset`, keyed by their start offset, trimmed
    /// so they never overlap
    segments: BTreeMap<u64, Vec<u8>>,
    /// Everything below this offset has been consumed by the reader
    read_offset: u64,
    /// The highest offset seen plus one, tracked for flow-control checks
    highest_received: u64,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The offset of the next byte the reader will observe
    #[inline]
    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    /// One past the highest byte offset received so far
    #[inline]
    pub fn highest_received(&self) -> u64 {
        self.highest_received
    }

    /// The length of the prefix currently available to the reader
    pub fn contiguous_len(&self) -> usize {
        let mut cursor = self.read_offset;
        let mut len = 0usize;
        for (&start, data) in self.segments.range(self.read_offset..) {
            if start > cursor {
                break;
            }
            let end = start + data.len() as u64;
            if end > cursor {
                len += (end - cursor) as usize;
                cursor = end;
            }
        }
        len
    }

    /// Returns true if any bytes are ready for the reader
    #[inline]
    pub fn is_readable(&self) -> bool {
        self.segments
            .get(&self.read_offset)
            .map_or(false, |data| !data.is_empty())
    }

    /// Inserts a segment at `offset`, merging duplicates and overlaps
    pub fn insert(&mut self, offset: u64, data: &[u8]) {
        if data.is_empty() {
            self.highest_received = self.highest_received.max(offset);
            return;
        }

        self.highest_received = self.highest_received.max(offset + data.len() as u64);

        // trim everything below the read offset
        let (mut offset, mut data) = if offset < self.read_offset {
            let skip = (self.read_offset - offset) as usize;
            if skip >= data.len() {
                return;
            }
            (self.read_offset, &data[skip..])
        } else {
            (offset, data)
        };

        // trim against the segment ending at or after our start
        if let Some((&start, existing)) = self.segments.range(..=offset).next_back() {
            let existing_end = start + existing.len() as u64;
            if existing_end > offset {
                let skip = (existing_end - offset) as usize;
                if skip >= data.len() {
                    return;
                }
                data = &data[skip..];
                offset = existing_end;
            }
        }

        // trim or absorb segments that start within our range
        let end = offset + data.len() as u64;
        let mut absorbed = Vec::new();
        for (&start, existing) in self.segments.range(offset..end) {
            let existing_end = start + existing.len() as u64;
            if existing_end <= end {
                absorbed.push(start);
            } else {
                // keep only our non-overlapping prefix
                data = &data[..(start - offset) as usize];
                break;
            }
        }
        for start in absorbed {
            self.segments.remove(&start);
        }

        if !data.is_empty() {
            self.segments.insert(offset, data.to_vec());
        }
    }

    /// Copies as many contiguous bytes as fit into `out`, advancing the
    /// read offset. Returns the number of bytes copied.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let mut copied = 0;

        while copied < out.len() {
            let Some(mut entry) = self.segments.first_entry() else {
                break;
            };

            let start = *entry.key();
            if start != self.read_offset {
                break;
            }

            let data = entry.get_mut();
            let take = data.len().min(out.len() - copied);
            out[copied..copied + take].copy_from_slice(&data[..take]);
            copied += take;
            self.read_offset += take as u64;

            if take == data.len() {
                entry.remove();
            } else {
                let rest = data.split_off(take);
                entry.remove();
                self.segments.insert(self.read_offset, rest);
            }
        }

        copied
    }

    /// Pops the entire contiguous prefix as an owned vector
    pub fn take_contiguous(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(entry) = self.segments.first_entry() {
            if *entry.key() != self.read_offset {
                break;
            }
            let data = entry.remove();
            self.read_offset += data.len() as u64;
            out.extend_from_slice(&data);
        }
        out
    }

    /// Discards all state, e.g. on stream reset
    pub fn clear(&mut self) {
        self.segments.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bolero::check;

    #[test]
    fn in_order_delivery() {
        let mut buffer = ReceiveBuffer::new();
        buffer.insert(0, b"hello ");
        buffer.insert(6, b"world");

        let mut out = [0u8; 16];
        let len = buffer.read(&mut out);
        assert_eq!(&out[..len], b"hello world");
        assert_eq!(buffer.read_offset(), 11);
    }

    #[test]
    fn out_of_order_delivery() {
        let mut buffer = ReceiveBuffer::new();
        buffer.insert(6, b"world");
        assert!(!buffer.is_readable());

        buffer.insert(0, b"hello ");
        let mut out = [0u8; 16];
        let len = buffer.read(&mut out);
        assert_eq!(&out[..len], b"hello world");
    }

    #[test]
    fn duplicates_and_overlaps_are_idempotent() {
        let mut buffer = ReceiveBuffer::new();
        buffer.insert(0, b"hello ");
        buffer.insert(0, b"hello ");
        buffer.insert(3, b"lo wor");
        buffer.insert(6, b"world");
        buffer.insert(2, b"l");

        let mut out = [0u8; 16];
        let len = buffer.read(&mut out);
        assert_eq!(&out[..len], b"hello world");

        // a late duplicate below the read offset is dropped
        buffer.insert(0, b"hello ");
        assert!(!buffer.is_readable());
    }

    #[test]
    fn partial_reads() {
        let mut buffer = ReceiveBuffer::new();
        buffer.insert(0, b"abcdef");

        let mut out = [0u8; 2];
        assert_eq!(buffer.read(&mut out), 2);
        assert_eq!(&out, b"ab");
        assert_eq!(buffer.read(&mut out), 2);
        assert_eq!(&out, b"cd");
        assert_eq!(buffer.read(&mut out), 2);
        assert_eq!(&out, b"ef");
        assert_eq!(buffer.read(&mut out), 0);
    }

    /// Any permutation of overlapping segments covering [0, N) is observed
    /// by the reader as exactly the bytes [0, N) in order
    #[test]
    fn linearization_test() {
        check!()
            .with_type::<Vec<(u8, u8)>>()
            .for_each(|segments| {
                let total: u64 = 257;
                let reference: Vec<u8> = (0..total).map(|i| i as u8).collect();

                let mut buffer = ReceiveBuffer::new();
                for &(start, len) in segments {
                    let start = start as u64;
                    let end = (start + len as u64).min(total);
                    if start >= total {
                        continue;
                    }
                    buffer.insert(start, &reference[start as usize..end as usize]);
                }
                // close any gaps deterministically
                buffer.insert(0, &reference);

                let mut out = alloc::vec![0u8; total as usize];
                let len = buffer.read(&mut out);
                assert_eq!(len, total as usize);
                assert_eq!(out, reference);
            });
    }
}
