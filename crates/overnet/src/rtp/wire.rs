// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTP segment encoder/decoder.
//!
//! Segments are an ASCII header followed by a binary-clean body:
//!
//! ```text
//! kind|seq|total|body
//! ```
//!
//! `kind`, `seq` and `total` are decimal integers. Decoding splits on
//! the first three `|` bytes only, so the body may itself contain `|`.

use crate::{Error, Result};

/// RTP segment kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Handshake step 1; body carries the proposed window in decimal.
    Request,
    /// Handshake step 2.
    Accept,
    /// Handshake step 3.
    Finalize,
    /// One windowed chunk of a transfer.
    Content,
    /// Acknowledges one content sequence number.
    Ak,
    /// Body names the wanted file.
    FileRequest,
    /// Body is `yes` or `DNE`.
    FileResponse,
}

impl SegmentKind {
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            Self::Request => 1,
            Self::Accept => 2,
            Self::Finalize => 3,
            Self::Content => 5,
            Self::Ak => 6,
            Self::FileRequest => 10,
            Self::FileResponse => 11,
        }
    }

    #[must_use]
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Request),
            2 => Some(Self::Accept),
            3 => Some(Self::Finalize),
            5 => Some(Self::Content),
            6 => Some(Self::Ak),
            10 => Some(Self::FileRequest),
            11 => Some(Self::FileResponse),
            _ => None,
        }
    }
}

/// One parsed RTP segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub seq: u32,
    pub total: u32,
    pub body: Vec<u8>,
}

impl Segment {
    pub fn new(kind: SegmentKind, seq: u32, total: u32, body: Vec<u8>) -> Self {
        Self {
            kind,
            seq,
            total,
            body,
        }
    }

    /// Bodyless segment with zeroed counters (handshake traffic).
    pub fn control(kind: SegmentKind) -> Self {
        Self::new(kind, 0, 0, Vec::new())
    }

    /// Encode to the wire form.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut wire = format!("{}|{}|{}|", self.kind.code(), self.seq, self.total).into_bytes();
        wire.extend_from_slice(&self.body);
        wire
    }

    /// Decode from the wire form.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] when the header fields are missing,
    /// non-numeric, or name an unknown kind.
    pub fn decode(wire: &[u8]) -> Result<Self> {
        let mut parts = wire.splitn(4, |&byte| byte == b'|');
        let kind_code = decimal_field(parts.next(), "kind")?;
        let seq = decimal_field(parts.next(), "seq")?;
        let total = decimal_field(parts.next(), "total")?;
        let body = parts
            .next()
            .ok_or_else(|| Error::InvalidArgument("rtp segment missing body".into()))?;

        let kind = SegmentKind::from_code(kind_code).ok_or_else(|| {
            Error::InvalidArgument(format!("rtp segment kind not known: {}", kind_code))
        })?;

        Ok(Self {
            kind,
            seq,
            total,
            body: body.to_vec(),
        })
    }
}

fn decimal_field(field: Option<&[u8]>, what: &str) -> Result<u32> {
    let field = field.ok_or_else(|| {
        Error::InvalidArgument(format!("rtp segment missing field: {}", what))
    })?;
    std::str::from_utf8(field)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| Error::InvalidArgument(format!("rtp segment bad field: {}", what)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let segment = Segment::new(SegmentKind::Content, 7, 1234, b"payload".to_vec());
        let decoded = Segment::decode(&segment.encode()).expect("decode should succeed");
        assert_eq!(decoded, segment);
    }

    #[test]
    fn test_wire_layout() {
        let segment = Segment::new(SegmentKind::Ak, 12, 0, Vec::new());
        assert_eq!(segment.encode(), b"6|12|0|");
    }

    #[test]
    fn test_body_may_contain_separator() {
        let segment = Segment::new(SegmentKind::Content, 1, 9, b"a|b|c".to_vec());
        let decoded = Segment::decode(&segment.encode()).expect("decode should succeed");
        assert_eq!(decoded.body, b"a|b|c");
    }

    #[test]
    fn test_body_is_binary_clean() {
        let body: Vec<u8> = (0..=255).collect();
        let segment = Segment::new(SegmentKind::Content, 3, 256, body.clone());
        let decoded = Segment::decode(&segment.encode()).expect("decode should succeed");
        assert_eq!(decoded.body, body);
    }

    #[test]
    fn test_request_carries_window() {
        let segment = Segment::new(SegmentKind::Request, 0, 0, b"5".to_vec());
        assert_eq!(segment.encode(), b"1|0|0|5");
    }

    #[test]
    fn test_malformed_rejected() {
        assert!(Segment::decode(b"").is_err());
        assert!(Segment::decode(b"5|1").is_err());
        assert!(Segment::decode(b"5|x|0|body").is_err());
        assert!(Segment::decode(b"99|0|0|body").is_err());
    }
}
