// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Overnet - a user-space overlay network stack over UDP
//!
//! Every participant runs the full stack and is addressed by a small
//! integer node id. The stack provides best-effort datagrams with
//! end-to-end addressing, fragmentation and reassembly (DNP),
//! distance-vector routing with heartbeat liveness (ROUTE), and a
//! connection-oriented reliable byte-stream with a three-way handshake
//! and sliding-window transfer (RTP). A file-transfer application sits
//! on top of the reliable service.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                      Applications                            |
//! |        console messages  |  file transfer (Base64)           |
//! +--------------------------------------------------------------+
//! |   RTP: handshake | windowed send | cumulative AK | teardown  |
//! |        ServicePoint: per-port connection multiplexer         |
//! +--------------------------------------------------------------+
//! |  ROUTE: neighbor liveness | advertisements | next-hop lookup |
//! +--------------------------------------------------------------+
//! |  DNP: end-to-end header | fragmentation | reassembly | fwd   |
//! +--------------------------------------------------------------+
//! |          LINK: MD5 checksum + TTL per-hop framing            |
//! +--------------------------------------------------------------+
//! |      Channel: UDP socket with loss/corruption simulation     |
//! +--------------------------------------------------------------+
//! ```
//!
//! Inbound data flows `Channel -> link::unpack -> Dnp::unpack ->
//! (reassemble | forward) -> dispatch by port`; outbound, services call
//! [`dnp::Dnp::send`] and the node loop drains the send queue through
//! the channel once per iteration.
//!
//! ## Concurrency model
//!
//! One thread per node owns all state. The only blocking point is the
//! socket/stdin poll; everything else runs to completion. Components
//! never hold references to each other - the node threads borrows down
//! the call tree, and DNP reaches routing through the small
//! [`dnp::Forwarding`] seam.

pub mod channel;
pub mod config;
pub mod dnp;
pub mod error;
pub mod link;
pub mod logging;
pub mod node;
pub mod route;
pub mod rtp;
pub mod service;
pub mod stack;
pub mod topology;

/// Node identifier. Unique per node per topology.
pub type NodeId = u32;

/// Service port identifier. See [`config`] for the reserved ports.
pub type PortId = u32;

pub use error::{Error, Result};
pub use node::Node;
pub use stack::Stack;
