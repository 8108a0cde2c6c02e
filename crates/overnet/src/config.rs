// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Overnet global configuration - single source of truth.
//!
//! This module centralizes every protocol constant and default timer.
//! **Never hardcode these elsewhere!**
//!
//! Timers are expressed as `Duration` constants; ports and header sizes
//! as plain integers. Runtime-tunable values (garble parameters, RTP
//! window, service limits) are plumbed through constructors, not stored
//! here.

use std::time::Duration;

// =======================================================================
// Reserved ports
// =======================================================================

/// Service port of the routing protocol on every node.
pub const ROUTE_PORT: u32 = 2;

/// Service port of the console message service on every node.
pub const MESSAGE_PORT: u32 = 4;

/// Default listen port a connection initiator addresses its REQUEST to.
pub const DEFAULT_LISTEN_PORT: u32 = 10;

/// Lower bound (inclusive) of the dynamic port pool.
pub const DYN_PORT_MIN: u32 = 20;

/// Upper bound (inclusive) of the dynamic port pool.
pub const DYN_PORT_MAX: u32 = 500;

// =======================================================================
// Wire geometry
// =======================================================================

/// Bytes the link layer prepends: 16-byte MD5 digest + 4-byte TTL.
pub const LINK_HEADER_LEN: usize = 20;

/// Bytes of the DNP header: 7 big-endian u32 fields.
pub const DNP_HEADER_LEN: usize = 28;

/// Total per-datagram overhead below the DNP body.
pub const HEADER_TOTAL: usize = LINK_HEADER_LEN + DNP_HEADER_LEN;

/// Default TTL stamped on locally originated datagrams.
pub const DEFAULT_TTL: u32 = 15;

/// MTU applied when a node addresses itself (loopback delivery).
pub const LOCAL_MTU: u32 = 10_000;

/// Receive buffer size for the node socket.
pub const RECV_BUFFER_LEN: usize = 4096;

// =======================================================================
// DNP timers
// =======================================================================

/// How long a partially reassembled message is kept without an update.
pub const BUFFER_TIMEOUT: Duration = Duration::from_millis(500);

// =======================================================================
// Routing timers and limits
// =======================================================================

/// Interval between heartbeat rounds to every neighbor.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Quiet period after which the unstable table is promoted to stable.
pub const STABILIZE_INTERVAL: Duration = Duration::from_millis(2000);

/// Quarantine period for targets whose route was just killed.
pub const REPLACE_INTERVAL: Duration = Duration::from_millis(510);

/// Unanswered heartbeats tolerated before a link is declared dead.
pub const PING_MAX: u32 = 3;

// =======================================================================
// RTP timers and limits
// =======================================================================

/// RTP maintenance tick period, and the base unit of every RTP timeout.
pub const RTP_TIMEOUT: Duration = Duration::from_millis(500);

/// Default body bytes per CONTENT segment.
pub const SEGMENT_MAX: usize = 500;

/// Default window size proposed by a connection initiator.
pub const DEFAULT_WINDOW: u32 = 5;

/// REQUEST sends allowed before the handshake is abandoned.
pub const REQUEST_MAX: u32 = 6;

/// ACCEPT sends allowed before the handshake is abandoned.
pub const ACCEPT_MAX: u32 = 6;

/// FINALIZE sends allowed before the handshake is abandoned.
pub const FINALIZE_MAX: u32 = 6;

/// Multiples of [`RTP_TIMEOUT`] of content/AK silence before a
/// connection is declared broken. Shorter silences only retransmit.
pub const BROKEN_TICKS: u32 = 10;

/// Default connection capacity of a service point.
pub const DEFAULT_MAX_CONNECTIONS: usize = 3;

// =======================================================================
// Node loop
// =======================================================================

/// Socket/stdin poll timeout per loop iteration.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Interval between cleanup passes over every service and DNP.
pub const CLEANUP_INTERVAL: Duration = Duration::from_millis(500);

/// Minimum spacing between two cleanup passes of one service point.
pub const CLEANUP_THROTTLE: Duration = Duration::from_millis(100);

/// Startup period during which queued datagrams are drained unread.
pub const BURN_IN: Duration = Duration::from_millis(1000);

/// Root directory of per-node file-transfer content
/// (`content/<node_id>/`).
pub const CONTENT_ROOT: &str = "content";
