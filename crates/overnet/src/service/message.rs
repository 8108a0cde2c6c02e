// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Console message service.
//!
//! Plain best-effort text between users: outbound messages ride DNP
//! unmodified, inbound ones are printed to the console. Bound to the
//! reserved message port on every node.

use crate::dnp::{Delivery, Dnp, Forwarding};
use crate::{Error, NodeId, PortId};

/// The console message service of one node.
pub struct Message {
    service_id: PortId,
    /// Messages delivered since the last [`Message::take_received`].
    received: Vec<(NodeId, String)>,
}

impl Message {
    #[must_use]
    pub fn new(service_id: PortId) -> Self {
        Self {
            service_id,
            received: Vec::new(),
        }
    }

    /// Send `text` to the message service of `target_id`.
    ///
    /// Unreachable targets are reported to the console, as the user
    /// typed the command that triggered this.
    pub fn send(&self, dnp: &mut Dnp, hops: &impl Forwarding, target_id: NodeId, text: &str) {
        match dnp.send(
            hops,
            text.as_bytes(),
            target_id,
            self.service_id,
            self.service_id,
            None,
            false,
        ) {
            Ok(()) => {}
            Err(Error::Unreachable(id)) => {
                println!("Destination is not reachable: {}", id);
            }
            Err(err) => {
                log::error!("[MSG] unexpected error: {}", err);
            }
        }
    }

    /// Show an inbound message on the console.
    pub fn serve(&mut self, packet: &Delivery) {
        let text = String::from_utf8_lossy(&packet.body).into_owned();
        println!();
        println!("Message from: {}", packet.source_id);
        println!("{}", text);
        println!();
        self.received.push((packet.source_id, text));
    }

    /// Drain the delivered-message log (introspection and tests).
    pub fn take_received(&mut self) -> Vec<(NodeId, String)> {
        std::mem::take(&mut self.received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MESSAGE_PORT;

    #[test]
    fn test_serve_records_message() {
        let mut service = Message::new(MESSAGE_PORT);
        service.serve(&Delivery {
            dest_port: MESSAGE_PORT,
            source_id: 3,
            source_port: MESSAGE_PORT,
            body: b"hi".to_vec(),
        });

        assert_eq!(service.take_received(), vec![(3, "hi".to_string())]);
        assert!(service.take_received().is_empty());
    }
}
