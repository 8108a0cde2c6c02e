// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DNP - the best-effort datagram layer.
//!
//! Provides end-to-end addressing over multi-hop links: a 28-byte
//! header (see [`header::DnpHeader`]), per-sender unique packet ids,
//! fragmentation against the next-hop link MTU, reassembly with a
//! timeout ledger, and transit forwarding.
//!
//! DNP consumes routing through the [`Forwarding`] seam instead of
//! holding a reference to the routing layer; the node wires the two at
//! call sites. Outbound datagrams accumulate in an internal queue the
//! node loop drains once per iteration.

pub mod header;
mod reassembly;

pub use header::DnpHeader;

use crate::config::{BUFFER_TIMEOUT, DEFAULT_TTL, HEADER_TOTAL};
use crate::topology::LinkTable;
use crate::{link, Error, NodeId, PortId, Result};
use reassembly::ReassemblyLedger;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Next-hop resolution seam, implemented by the routing layer.
pub trait Forwarding {
    /// Neighbor to forward toward `target`, or the target itself when
    /// `link_only` (heartbeats and advertisements bypass the table).
    fn next_hop(&self, target: NodeId, link_only: bool) -> Result<NodeId>;
}

/// One datagram waiting on the node's send queue.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub datagram: Vec<u8>,
    /// Next-hop neighbor (or self for loopback delivery).
    pub neighbor: NodeId,
    pub addr: SocketAddr,
}

/// Why an inbound datagram was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Corrupt,
    TtlExpired,
    Unroutable,
}

/// A whole message addressed to this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub dest_port: PortId,
    pub source_id: NodeId,
    pub source_port: PortId,
    pub body: Vec<u8>,
}

/// Result of feeding one raw datagram through [`Dnp::unpack`].
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// Complete message for a local service.
    Deliver(Delivery),
    /// In transit; re-enqueued toward the returned neighbor.
    Forwarded(NodeId),
    /// Fragment stored, message not yet complete.
    Buffering,
    /// Discarded.
    Dropped(DropReason),
}

/// Datagram layer state of one node.
pub struct Dnp {
    node_id: NodeId,
    links: Rc<LinkTable>,
    /// Monotonic id source; bumped once per logical send, not per fragment.
    packet_counter: u32,
    buffer_timeout: Duration,
    ledger: ReassemblyLedger,
    outbound: Vec<Outbound>,
}

impl Dnp {
    pub fn new(links: Rc<LinkTable>) -> Self {
        Self::with_buffer_timeout(links, BUFFER_TIMEOUT)
    }

    pub fn with_buffer_timeout(links: Rc<LinkTable>, buffer_timeout: Duration) -> Self {
        Self {
            node_id: links.node_id(),
            links,
            packet_counter: 0,
            buffer_timeout,
            ledger: ReassemblyLedger::new(),
            outbound: Vec::new(),
        }
    }

    /// Total header bytes below the DNP body (link + DNP).
    #[must_use]
    pub fn header_total() -> usize {
        HEADER_TOTAL
    }

    /// Send `message` toward `dest_id`, fragmenting to the next-hop MTU.
    ///
    /// `ttl` defaults to [`DEFAULT_TTL`]; `link_only` bypasses the
    /// routing table and addresses a direct neighbor (routing traffic).
    ///
    /// # Errors
    /// [`Error::Unreachable`] when routing has no entry for `dest_id`;
    /// [`Error::NotLinked`] when `link_only` names a non-neighbor;
    /// [`Error::InvalidArgument`] when the link MTU cannot fit a single
    /// body byte under the headers.
    pub fn send(
        &mut self,
        hops: &impl Forwarding,
        message: &[u8],
        dest_id: NodeId,
        dest_port: PortId,
        source_port: PortId,
        ttl: Option<u32>,
        link_only: bool,
    ) -> Result<()> {
        let next = hops.next_hop(dest_id, link_only)?;
        let mtu = self.links.mtu(next)?;
        let addr = self.links.addr(next)?;

        let max_body = (mtu as usize)
            .checked_sub(HEADER_TOTAL)
            .filter(|&room| room > 0)
            .ok_or_else(|| {
                Error::InvalidArgument(format!("link mtu {} leaves no room for a body", mtu))
            })?;

        let ttl = ttl.unwrap_or(DEFAULT_TTL);
        let total_size = message.len() as u32;

        log::info!("[DNP] sending {} bytes to node {}", message.len(), dest_id);

        let mut offset = 0usize;
        for chunk in message.chunks(max_body) {
            let header = DnpHeader {
                dest_id,
                packet_id: self.packet_counter,
                byte_offset: offset as u32,
                total_size,
                dest_port,
                source_id: self.node_id,
                source_port,
            };

            let mut payload = header.encode().to_vec();
            payload.extend_from_slice(chunk);

            self.outbound.push(Outbound {
                datagram: link::pack(&payload, ttl),
                neighbor: next,
                addr,
            });
            offset += chunk.len();
        }

        // One id per logical message, however many fragments it became.
        self.packet_counter = self.packet_counter.wrapping_add(1);
        Ok(())
    }

    /// Process one raw datagram from the channel.
    pub fn unpack(
        &mut self,
        hops: &impl Forwarding,
        datagram: &[u8],
        now: Instant,
    ) -> DeliveryOutcome {
        let (ttl, payload) = match link::unpack(datagram) {
            Ok(unpacked) => unpacked,
            Err(Error::TtlExpired) => {
                log::info!("[DNP] dropping datagram: TTL expired");
                return DeliveryOutcome::Dropped(DropReason::TtlExpired);
            }
            Err(_) => {
                log::info!("[DNP] dropping corrupt datagram ({} bytes)", datagram.len());
                return DeliveryOutcome::Dropped(DropReason::Corrupt);
            }
        };

        let (header, body) = match DnpHeader::decode(payload) {
            Ok(decoded) => decoded,
            Err(_) => {
                log::info!("[DNP] dropping datagram with short header");
                return DeliveryOutcome::Dropped(DropReason::Corrupt);
            }
        };

        if header.dest_id != self.node_id {
            return self.forward(hops, payload, header.dest_id, ttl);
        }

        if body.len() == header.total_size as usize {
            return DeliveryOutcome::Deliver(Delivery {
                dest_port: header.dest_port,
                source_id: header.source_id,
                source_port: header.source_port,
                body: body.to_vec(),
            });
        }

        match self.ledger.insert(&header, body, now) {
            Some(message) => DeliveryOutcome::Deliver(Delivery {
                dest_port: header.dest_port,
                source_id: header.source_id,
                source_port: header.source_port,
                body: message,
            }),
            None => DeliveryOutcome::Buffering,
        }
    }

    /// Re-frame a transit datagram under the decremented TTL and queue it.
    fn forward(
        &mut self,
        hops: &impl Forwarding,
        payload: &[u8],
        dest_id: NodeId,
        ttl: u32,
    ) -> DeliveryOutcome {
        log::info!("[DNP] got packet for another destination: {}", dest_id);

        if ttl == 0 {
            log::info!("[DNP] transit packet to {} out of hops", dest_id);
            return DeliveryOutcome::Dropped(DropReason::TtlExpired);
        }

        let next = match hops.next_hop(dest_id, false) {
            Ok(next) => next,
            Err(_) => {
                log::debug!("[DNP] no route for transit packet to {}", dest_id);
                return DeliveryOutcome::Dropped(DropReason::Unroutable);
            }
        };
        let addr = match self.links.addr(next) {
            Ok(addr) => addr,
            Err(_) => {
                log::debug!("[DNP] next hop {} is not linked", next);
                return DeliveryOutcome::Dropped(DropReason::Unroutable);
            }
        };

        self.outbound.push(Outbound {
            datagram: link::pack(payload, ttl),
            neighbor: next,
            addr,
        });
        DeliveryOutcome::Forwarded(next)
    }

    /// Drop reassembly buffers that have gone quiet.
    pub fn cleanup(&mut self, now: Instant) {
        let reaped = self.ledger.reap(self.buffer_timeout, now);
        if reaped > 0 {
            log::info!("[DNP] reaped {} stale reassembly buffers", reaped);
        }
    }

    /// Take every queued outbound datagram.
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbound)
    }

    /// Queued outbound datagrams (not yet drained).
    #[must_use]
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }
}
