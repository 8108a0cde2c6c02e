// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DNP header encoder/decoder.
//!
//! Seven network-order 32-bit unsigned fields, 28 bytes total:
//!
//! ```text
//! dest_id | packet_id | byte_offset | total_size | dest_port | source_id | source_port
//!    4    |     4     |      4      |     4      |     4     |     4     |      4
//! ```

use crate::config::DNP_HEADER_LEN;
use crate::{Error, NodeId, PortId, Result};

/// Parsed DNP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnpHeader {
    pub dest_id: NodeId,
    pub packet_id: u32,
    pub byte_offset: u32,
    pub total_size: u32,
    pub dest_port: PortId,
    pub source_id: NodeId,
    pub source_port: PortId,
}

impl DnpHeader {
    /// Encode into the fixed 28-byte wire form.
    #[must_use]
    pub fn encode(&self) -> [u8; DNP_HEADER_LEN] {
        let mut buf = [0u8; DNP_HEADER_LEN];
        let fields = [
            self.dest_id,
            self.packet_id,
            self.byte_offset,
            self.total_size,
            self.dest_port,
            self.source_id,
            self.source_port,
        ];
        for (slot, field) in buf.chunks_exact_mut(4).zip(fields) {
            slot.copy_from_slice(&field.to_be_bytes());
        }
        buf
    }

    /// Decode the header from the front of `payload`, returning the body.
    ///
    /// # Errors
    /// [`Error::Corrupt`] when `payload` is shorter than the header.
    pub fn decode(payload: &[u8]) -> Result<(Self, &[u8])> {
        if payload.len() < DNP_HEADER_LEN {
            return Err(Error::Corrupt);
        }

        let (header, body) = payload.split_at(DNP_HEADER_LEN);
        let mut fields = [0u32; 7];
        for (field, chunk) in fields.iter_mut().zip(header.chunks_exact(4)) {
            *field = u32::from_be_bytes(chunk.try_into().map_err(|_| Error::Corrupt)?);
        }

        Ok((
            Self {
                dest_id: fields[0],
                packet_id: fields[1],
                byte_offset: fields[2],
                total_size: fields[3],
                dest_port: fields[4],
                source_id: fields[5],
                source_port: fields[6],
            },
            body,
        ))
    }
}
