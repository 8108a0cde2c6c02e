// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fragment reassembly ledger.
//!
//! Fragments of one logical message share a `(dest_port, source_id,
//! source_port, packet_id)` key. Chunks are kept in a `BTreeMap` keyed
//! by byte offset, so duplicates are idempotent (last write wins) and
//! concatenation is ordered by construction. A buffer is destroyed on
//! successful reassembly or after `buffer_timeout` without an arrival.

use super::header::DnpHeader;
use crate::{NodeId, PortId};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Composite key identifying one in-flight logical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(super) struct BufferKey {
    dest_port: PortId,
    source_id: NodeId,
    source_port: PortId,
    packet_id: u32,
}

impl BufferKey {
    fn of(header: &DnpHeader) -> Self {
        Self {
            dest_port: header.dest_port,
            source_id: header.source_id,
            source_port: header.source_port,
            packet_id: header.packet_id,
        }
    }
}

/// One partially reassembled message.
#[derive(Debug)]
struct Buffer {
    last_update: Instant,
    total_size: u32,
    chunks: BTreeMap<u32, Vec<u8>>,
}

impl Buffer {
    fn new(total_size: u32, now: Instant) -> Self {
        Self {
            last_update: now,
            total_size,
            chunks: BTreeMap::new(),
        }
    }

    fn insert(&mut self, offset: u32, body: &[u8], now: Instant) {
        self.last_update = now;
        self.chunks.insert(offset, body.to_vec());
    }

    /// Concatenate when every byte is present.
    fn combine(&self) -> Option<Vec<u8>> {
        let present: usize = self.chunks.values().map(Vec::len).sum();
        if present == self.total_size as usize {
            let mut combined = Vec::with_capacity(present);
            for chunk in self.chunks.values() {
                combined.extend_from_slice(chunk);
            }
            Some(combined)
        } else {
            None
        }
    }
}

/// All in-flight reassembly buffers of one node.
#[derive(Debug, Default)]
pub(super) struct ReassemblyLedger {
    buffers: BTreeMap<BufferKey, Buffer>,
}

impl ReassemblyLedger {
    pub(super) fn new() -> Self {
        Self::default()
    }

    /// Record one fragment; returns the full message once complete.
    pub(super) fn insert(
        &mut self,
        header: &DnpHeader,
        body: &[u8],
        now: Instant,
    ) -> Option<Vec<u8>> {
        let key = BufferKey::of(header);
        let buffer = self
            .buffers
            .entry(key)
            .or_insert_with(|| Buffer::new(header.total_size, now));
        buffer.insert(header.byte_offset, body, now);

        let combined = buffer.combine();
        if combined.is_some() {
            self.buffers.remove(&key);
        }
        combined
    }

    /// Drop buffers idle longer than `timeout`; returns the reap count.
    pub(super) fn reap(&mut self, timeout: Duration, now: Instant) -> usize {
        let before = self.buffers.len();
        self.buffers
            .retain(|_, buffer| now.duration_since(buffer.last_update) <= timeout);
        before - self.buffers.len()
    }

    #[cfg(test)]
    pub(super) fn len(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(packet_id: u32, offset: u32, total: u32) -> DnpHeader {
        DnpHeader {
            dest_id: 1,
            packet_id,
            byte_offset: offset,
            total_size: total,
            dest_port: 10,
            source_id: 2,
            source_port: 30,
        }
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let mut ledger = ReassemblyLedger::new();
        let now = Instant::now();

        assert!(ledger.insert(&header(7, 5, 10), b"world", now).is_none());
        let message = ledger
            .insert(&header(7, 0, 10), b"hello", now)
            .expect("complete after both fragments");
        assert_eq!(message, b"helloworld");
        assert_eq!(ledger.len(), 0);
    }

    #[test]
    fn test_duplicate_offsets_idempotent() {
        let mut ledger = ReassemblyLedger::new();
        let now = Instant::now();

        assert!(ledger.insert(&header(7, 0, 10), b"hello", now).is_none());
        assert!(ledger.insert(&header(7, 0, 10), b"hello", now).is_none());
        let message = ledger
            .insert(&header(7, 5, 10), b"world", now)
            .expect("complete");
        assert_eq!(message, b"helloworld");
    }

    #[test]
    fn test_distinct_messages_do_not_mix() {
        let mut ledger = ReassemblyLedger::new();
        let now = Instant::now();

        assert!(ledger.insert(&header(1, 0, 8), b"aaaa", now).is_none());
        assert!(ledger.insert(&header(2, 0, 8), b"bbbb", now).is_none());
        assert_eq!(ledger.len(), 2);

        let first = ledger.insert(&header(1, 4, 8), b"AAAA", now).expect("done");
        assert_eq!(first, b"aaaaAAAA");
        let second = ledger.insert(&header(2, 4, 8), b"BBBB", now).expect("done");
        assert_eq!(second, b"bbbbBBBB");
    }

    #[test]
    fn test_reap_idle_buffers() {
        let mut ledger = ReassemblyLedger::new();
        let start = Instant::now();
        let timeout = Duration::from_millis(500);

        ledger.insert(&header(1, 0, 100), b"partial", start);
        ledger.insert(&header(2, 0, 100), b"partial", start + Duration::from_millis(400));

        // Only the first buffer has been idle past the timeout.
        let reaped = ledger.reap(timeout, start + Duration::from_millis(600));
        assert_eq!(reaped, 1);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_arrival_refreshes_timestamp() {
        let mut ledger = ReassemblyLedger::new();
        let start = Instant::now();
        let timeout = Duration::from_millis(500);

        ledger.insert(&header(1, 0, 100), b"partial", start);
        ledger.insert(&header(1, 7, 100), b"more", start + Duration::from_millis(400));

        assert_eq!(ledger.reap(timeout, start + Duration::from_millis(700)), 0);
        assert_eq!(ledger.len(), 1);
    }
}
