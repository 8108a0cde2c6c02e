// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Garbled UDP channel.
//!
//! The node's one socket, wrapped in an unreliable-channel simulator:
//! each outbound datagram is lost with probability `loss`% and, if it
//! survives, corrupted with probability `corruption`% (random bytes
//! replaced by random ASCII letters). Inbound traffic is untouched;
//! the peers' own channels garble their sends.
//!
//! **Do not send through the raw socket** - everything outbound goes
//! through [`Channel::send_garbled`] so the configured channel quality
//! applies uniformly.

use crate::{Error, Result};
use mio::net::UdpSocket;
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;

/// Garble parameter: how to set a loss/corruption threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GarbleParam {
    /// Keep the current value.
    Same,
    /// Return to the value set at construction.
    Default,
    /// Zero: the channel becomes perfectly reliable.
    Never,
    /// Explicit percentage in 0..=100.
    Percent(u8),
}

impl GarbleParam {
    /// Parse `SAME`/`DEFAULT`/`NEVER` (any case) or a number.
    pub fn parse(text: &str) -> Result<Self> {
        match text.to_ascii_uppercase().as_str() {
            "SAME" => Ok(Self::Same),
            "DEFAULT" => Ok(Self::Default),
            "NEVER" => Ok(Self::Never),
            other => other
                .parse()
                .map(Self::Percent)
                .map_err(|_| Error::InvalidArgument(format!("garble value not valid: {}", text))),
        }
    }

    fn resolve(self, current: u8, default: u8) -> u8 {
        match self {
            Self::Same => current,
            Self::Default => default,
            Self::Never => 0,
            Self::Percent(value) => value,
        }
    }
}

/// The node's UDP socket plus channel-quality simulation.
pub struct Channel {
    socket: UdpSocket,
    local_addr: SocketAddr,
    loss: u8,
    corruption: u8,
    default_loss: u8,
    default_corruption: u8,
    rng: fastrand::Rng,
}

impl Channel {
    /// Bind the node socket and set the default garble parameters.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] for thresholds outside 0..=100,
    /// [`Error::Io`] when binding fails.
    pub fn bind(addr: SocketAddr, loss: u8, corruption: u8) -> Result<Self> {
        validate(loss)?;
        validate(corruption)?;

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket);
        let local_addr = socket.local_addr()?;

        log::warn!("[UDP] bound socket to: {}", local_addr);

        Ok(Self {
            socket,
            local_addr,
            loss,
            corruption,
            default_loss: loss,
            default_corruption: corruption,
            rng: fastrand::Rng::new(),
        })
    }

    /// Register the socket with a mio poll registry.
    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut self.socket, token, Interest::READABLE)
    }

    /// Receive one datagram; `WouldBlock` when the queue is empty.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }

    /// Send one datagram subject to the configured channel quality.
    pub fn send_garbled(&mut self, message: &[u8], dest: SocketAddr) {
        if self.rng.u8(1..=100) <= self.loss {
            log::info!("[UDP] packet loss sending to: {}", dest);
            return;
        }

        let to_send = if self.rng.u8(1..=100) <= self.corruption {
            log::info!("[UDP] packet corruption sending to: {}", dest);
            Some(garble(&mut self.rng, message))
        } else {
            None
        };
        let payload = to_send.as_deref().unwrap_or(message);

        match self.socket.send_to(payload, dest) {
            Ok(_) => log::debug!("[UDP] packet sent to: {} ({} bytes)", dest, payload.len()),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                log::debug!("[UDP] send buffer full, dropping packet to {}", dest);
            }
            Err(err) => log::warn!("[UDP] send to {} failed: {}", dest, err),
        }
    }

    /// Reconfigure the garbler.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] for values outside 0..=100.
    pub fn set_garble(&mut self, loss: GarbleParam, corruption: GarbleParam) -> Result<()> {
        let new_loss = loss.resolve(self.loss, self.default_loss);
        let new_corruption = corruption.resolve(self.corruption, self.default_corruption);
        validate(new_loss)?;
        validate(new_corruption)?;

        self.loss = new_loss;
        self.corruption = new_corruption;
        log::warn!(
            "[UDP] garble parameters set to: loss: {} corruption: {}",
            self.loss,
            self.corruption
        );
        Ok(())
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    #[must_use]
    pub fn loss(&self) -> u8 {
        self.loss
    }

    #[must_use]
    pub fn corruption(&self) -> u8 {
        self.corruption
    }

    /// Reseed the garbler (deterministic channel behavior in tests).
    pub fn reseed(&mut self, seed: u64) {
        self.rng = fastrand::Rng::with_seed(seed);
    }
}

fn validate(value: u8) -> Result<()> {
    if value > 100 {
        return Err(Error::InvalidArgument(format!(
            "garble threshold invalid: {}",
            value
        )));
    }
    Ok(())
}

/// Replace roughly half the bytes with random ASCII letters.
fn garble(rng: &mut fastrand::Rng, message: &[u8]) -> Vec<u8> {
    message
        .iter()
        .map(|&byte| if rng.bool() { byte } else { rng.alphabetic() as u8 })
        .collect()
}
