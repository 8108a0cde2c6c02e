// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Overnet error types.
//!
//! One crate-wide enum covers every layer. Transport-level failures
//! (`Corrupt`, `TtlExpired`, `Unroutable`, `BufferTimeout`) are
//! recovered locally by dropping the offending datagram; connection
//! failures propagate to the owning service point, which unregisters
//! the connection; configuration and CLI failures are reported to the
//! console.

use crate::NodeId;
use std::fmt;
use std::io;

/// Result type for overnet operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur anywhere in the stack.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Transport errors (recovered by dropping the datagram)
    // ========================================================================
    /// Link-layer checksum mismatch or unparseable header.
    Corrupt,
    /// TTL reached zero before delivery.
    TtlExpired,
    /// Down link or datagram larger than the link MTU.
    Unroutable,
    /// Fragment reassembly abandoned after inactivity.
    BufferTimeout,

    // ========================================================================
    // Routing errors
    // ========================================================================
    /// No routing entry for the target node.
    Unreachable(NodeId),
    /// The target node is not a direct neighbor.
    NotLinked(NodeId),

    // ========================================================================
    // Connection errors (propagated to the owning service point)
    // ========================================================================
    /// Handshake retry limit reached without a response.
    HandshakeExhausted,
    /// A transfer is already queued on this connection.
    ConnectionBusy,
    /// Content or AK silence exceeded the broken threshold.
    ConnectionBroken,
    /// The requested file is not in the peer's content directory.
    FileNotFound(String),

    // ========================================================================
    // Configuration and I/O
    // ========================================================================
    /// Malformed topology file, command argument, or parameter.
    InvalidArgument(String),
    /// Underlying I/O failure.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Corrupt => write!(f, "datagram corrupt"),
            Self::TtlExpired => write!(f, "TTL expired"),
            Self::Unroutable => write!(f, "link down or MTU exceeded"),
            Self::BufferTimeout => write!(f, "fragment reassembly timed out"),
            Self::Unreachable(id) => write!(f, "node {} is not reachable", id),
            Self::NotLinked(id) => write!(f, "not linked to node {}", id),
            Self::HandshakeExhausted => write!(f, "handshake retry limit reached"),
            Self::ConnectionBusy => write!(f, "connection is busy"),
            Self::ConnectionBroken => write!(f, "connection broken"),
            Self::FileNotFound(name) => write!(f, "file does not exist: {}", name),
            Self::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            Self::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
