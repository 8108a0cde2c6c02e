// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Link layer: per-hop framing with corruption detection and TTL.
//!
//! Every datagram on the wire is `digest[16] || ttl(u32 BE) || payload`,
//! where the digest is the MD5 of `ttl || payload`. The channel may
//! flip arbitrary bytes; a digest mismatch surfaces as [`Error::Corrupt`]
//! and the datagram is dropped one hop after the damage.
//!
//! # Wire format
//!
//! ```text
//! 0              16      20
//! +--------------+-------+----------------------+
//! |  MD5 digest  |  TTL  |     DNP payload      |
//! +--------------+-------+----------------------+
//! ```
//!
//! `unpack` decrements the TTL; a TTL that would reach zero fails with
//! [`Error::TtlExpired`]. Forwarders re-frame the payload under the
//! decremented TTL, so each hop carries a fresh digest.

use crate::config::LINK_HEADER_LEN;
use crate::{Error, Result};
use md5::{Digest, Md5};

const DIGEST_LEN: usize = 16;
const TTL_LEN: usize = 4;

/// Bytes this layer prepends to the DNP payload.
#[must_use]
pub fn header_total() -> usize {
    LINK_HEADER_LEN
}

/// Frame `payload` for one hop under `ttl`.
#[must_use]
pub fn pack(payload: &[u8], ttl: u32) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(LINK_HEADER_LEN + payload.len());
    datagram.extend_from_slice(&digest(ttl, payload));
    datagram.extend_from_slice(&ttl.to_be_bytes());
    datagram.extend_from_slice(payload);
    datagram
}

/// Strip the link header, returning the decremented TTL and the payload.
///
/// A datagram arriving with TTL 1 is still deliverable locally (its
/// decremented TTL is 0); forwarding it further is what expires. This
/// is what lets TTL-1 heartbeats reach a direct neighbor.
///
/// # Errors
/// - [`Error::Corrupt`] when the datagram is shorter than the header or
///   the digest does not match.
/// - [`Error::TtlExpired`] when the TTL is already exhausted.
pub fn unpack(datagram: &[u8]) -> Result<(u32, &[u8])> {
    if datagram.len() < LINK_HEADER_LEN {
        return Err(Error::Corrupt);
    }

    let (sent_digest, rest) = datagram.split_at(DIGEST_LEN);
    let (ttl_bytes, payload) = rest.split_at(TTL_LEN);
    let ttl = u32::from_be_bytes(ttl_bytes.try_into().map_err(|_| Error::Corrupt)?);

    if digest(ttl, payload) != sent_digest {
        return Err(Error::Corrupt);
    }

    if ttl == 0 {
        return Err(Error::TtlExpired);
    }

    Ok((ttl - 1, payload))
}

fn digest(ttl: u32, payload: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Md5::new();
    hasher.update(ttl.to_be_bytes());
    hasher.update(payload);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let payload = b"link payload";
        let datagram = pack(payload, 5);
        assert_eq!(datagram.len(), LINK_HEADER_LEN + payload.len());

        let (ttl, body) = unpack(&datagram).expect("unpack should succeed");
        assert_eq!(ttl, 4);
        assert_eq!(body, payload);
    }

    #[test]
    fn test_flipped_byte_is_corrupt() {
        let mut datagram = pack(b"hello", 5);
        let last = datagram.len() - 1;
        datagram[last] ^= 0xFF;
        assert!(matches!(unpack(&datagram), Err(Error::Corrupt)));
    }

    #[test]
    fn test_flipped_ttl_is_corrupt() {
        let mut datagram = pack(b"hello", 5);
        datagram[DIGEST_LEN] ^= 0x01;
        assert!(matches!(unpack(&datagram), Err(Error::Corrupt)));
    }

    #[test]
    fn test_truncated_datagram_is_corrupt() {
        assert!(matches!(unpack(&[0u8; 7]), Err(Error::Corrupt)));
        assert!(matches!(unpack(&[]), Err(Error::Corrupt)));
    }

    #[test]
    fn test_ttl_expiry() {
        assert!(matches!(unpack(&pack(b"spent", 0)), Err(Error::TtlExpired)));

        // TTL 1 reaches a direct neighbor, then cannot travel further.
        let datagram = pack(b"one hop", 1);
        let (ttl, _) = unpack(&datagram).expect("deliverable at first hop");
        assert_eq!(ttl, 0);
        assert!(matches!(unpack(&pack(b"one hop", ttl)), Err(Error::TtlExpired)));
    }

    #[test]
    fn test_empty_payload() {
        let datagram = pack(b"", 3);
        let (ttl, body) = unpack(&datagram).expect("unpack should succeed");
        assert_eq!(ttl, 2);
        assert!(body.is_empty());
    }
}
