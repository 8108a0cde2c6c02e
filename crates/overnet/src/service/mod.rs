// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service-side port management.
//!
//! Every dynamically created endpoint (service-point listen ports and
//! per-connection RTP ports) draws from the shared pool [20, 500]. The
//! registry records which service point owns each minted port so the
//! node loop can dispatch inbound packets without a per-packet scan.

pub mod message;
pub mod point;

use crate::config::{DYN_PORT_MAX, DYN_PORT_MIN};
use crate::{Error, PortId, Result};
use std::collections::BTreeMap;

/// Node-wide registry of dynamically assigned ports.
pub struct PortRegistry {
    /// Minted port -> owning service point's listen port.
    used: BTreeMap<PortId, PortId>,
    rng: fastrand::Rng,
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PortRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            used: BTreeMap::new(),
            rng: fastrand::Rng::new(),
        }
    }

    /// Deterministic registry for tests.
    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            used: BTreeMap::new(),
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    /// Mint an unused port from the pool for `owner`.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] once the pool is exhausted.
    pub fn mint(&mut self, owner: PortId) -> Result<PortId> {
        let port = self.pick()?;
        self.used.insert(port, owner);
        Ok(port)
    }

    /// Mint a port that owns itself (a service-point listen port).
    pub fn mint_listen(&mut self) -> Result<PortId> {
        let port = self.pick()?;
        self.used.insert(port, port);
        Ok(port)
    }

    fn pick(&mut self) -> Result<PortId> {
        let pool = (DYN_PORT_MAX - DYN_PORT_MIN + 1) as usize;
        if self.used.len() >= pool {
            return Err(Error::InvalidArgument("dynamic port pool exhausted".into()));
        }

        let mut port = self.rng.u32(DYN_PORT_MIN..=DYN_PORT_MAX);
        while self.used.contains_key(&port) {
            port = self.rng.u32(DYN_PORT_MIN..=DYN_PORT_MAX);
        }
        Ok(port)
    }

    /// Listen port of the service point owning `port`.
    #[must_use]
    pub fn owner_of(&self, port: PortId) -> Option<PortId> {
        self.used.get(&port).copied()
    }

    /// Return a port to the pool.
    pub fn release(&mut self, port: PortId) {
        self.used.remove(&port);
    }

    #[must_use]
    pub fn is_used(&self, port: PortId) -> bool {
        self.used.contains_key(&port)
    }
}
