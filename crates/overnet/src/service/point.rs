// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service point: the per-port connection multiplexer.
//!
//! A service point owns a listen port plus a set of RTP connections,
//! each bound to its own dynamic port. Packets addressed to the listen
//! port are connection requests and spawn a fresh responder connection;
//! everything else is dispatched to the connection registered at the
//! packet's destination port. Connections that exhaust their handshake
//! or go broken are unregistered during cleanup.

use crate::config::CLEANUP_THROTTLE;
use crate::dnp::{Delivery, Dnp, Forwarding};
use crate::rtp::wire::{Segment, SegmentKind};
use crate::rtp::{content, Connection};
use crate::service::PortRegistry;
use crate::{Error, NodeId, PortId, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// One listening service and its connections.
pub struct ServicePoint {
    service_id: PortId,
    max_connections: usize,
    connections: BTreeMap<PortId, Connection>,
    /// Connection the `download` command sends through.
    send_connection: Option<PortId>,
    content_dir: PathBuf,
    last_cleanup: Option<Instant>,
}

impl ServicePoint {
    /// Create a service point listening on `service_id`.
    ///
    /// Ensures the node's content directory exists, since accepted
    /// connections may immediately serve file requests out of it.
    pub fn new(
        node_id: NodeId,
        service_id: PortId,
        max_connections: usize,
        content_root: &Path,
    ) -> Result<Self> {
        let content_dir = content::ensure_content_dir(content_root, node_id)?;
        Ok(Self {
            service_id,
            max_connections,
            connections: BTreeMap::new(),
            send_connection: None,
            content_dir,
            last_cleanup: None,
        })
    }

    #[must_use]
    pub fn service_id(&self) -> PortId {
        self.service_id
    }

    /// Route one inbound packet: listen port -> accept, else dispatch.
    pub fn serve(
        &mut self,
        dnp: &mut Dnp,
        hops: &impl Forwarding,
        ports: &mut PortRegistry,
        packet: &Delivery,
        now: Instant,
    ) -> Result<()> {
        if packet.dest_port == self.service_id {
            return self.accept_connection(dnp, hops, ports, packet, now);
        }

        match self.connections.get_mut(&packet.dest_port) {
            Some(connection) => connection.serve(dnp, hops, packet, now),
            None => {
                log::info!(
                    "[SP] no connection on port {} (from node {})",
                    packet.dest_port,
                    packet.source_id
                );
                Ok(())
            }
        }
    }

    /// Spawn a responder connection for a REQUEST on the listen port.
    fn accept_connection(
        &mut self,
        dnp: &mut Dnp,
        hops: &impl Forwarding,
        ports: &mut PortRegistry,
        packet: &Delivery,
        now: Instant,
    ) -> Result<()> {
        if self.connections.len() >= self.max_connections {
            return Err(Error::InvalidArgument(
                "could not accept connection, maximum connections reached".into(),
            ));
        }

        let segment = Segment::decode(&packet.body)?;
        if segment.kind != SegmentKind::Request {
            log::info!(
                "[SP] non-request segment on listen port from node {}",
                packet.source_id
            );
            return Ok(());
        }
        let window = String::from_utf8_lossy(&segment.body)
            .parse()
            .map_err(|_| Error::InvalidArgument("request carries no window".into()))?;

        let local_port = ports.mint(self.service_id)?;
        let connection = match Connection::accept_from(
            dnp,
            hops,
            local_port,
            packet.source_id,
            packet.source_port,
            window,
            self.content_dir.clone(),
            now,
        ) {
            Ok(connection) => connection,
            Err(err) => {
                ports.release(local_port);
                return Err(err);
            }
        };
        self.connections.insert(local_port, connection);
        Ok(())
    }

    /// Initiate a connection to `(target_id, listen_port)`.
    ///
    /// The route lookup happens before anything is created, so an
    /// unreachable target fails without emitting a datagram.
    pub fn start_connection(
        &mut self,
        dnp: &mut Dnp,
        hops: &impl Forwarding,
        ports: &mut PortRegistry,
        target_id: NodeId,
        listen_port: PortId,
        window: u32,
        now: Instant,
    ) -> Result<PortId> {
        if self.connections.len() >= self.max_connections {
            return Err(Error::InvalidArgument(
                "could not start connection, maximum connections reached".into(),
            ));
        }

        hops.next_hop(target_id, false)?;

        let local_port = ports.mint(self.service_id)?;
        let connection = match Connection::initiate(
            dnp,
            hops,
            local_port,
            target_id,
            listen_port,
            window,
            self.content_dir.clone(),
            now,
        ) {
            Ok(connection) => connection,
            Err(err) => {
                ports.release(local_port);
                return Err(err);
            }
        };
        self.connections.insert(local_port, connection);
        self.send_connection = Some(local_port);
        Ok(local_port)
    }

    /// Ask for a file over the connection opened by `start_connection`.
    pub fn file_request(
        &mut self,
        dnp: &mut Dnp,
        hops: &impl Forwarding,
        name: &str,
        now: Instant,
    ) -> Result<()> {
        let port = self
            .send_connection
            .ok_or_else(|| Error::InvalidArgument("service point has no outbound connection".into()))?;
        let connection = self
            .connections
            .get_mut(&port)
            .ok_or_else(|| Error::InvalidArgument("outbound connection is gone".into()))?;
        connection.file_request(dnp, hops, name, now);
        Ok(())
    }

    /// Tick every connection; failed ones are unregistered here.
    pub fn cleanup(
        &mut self,
        dnp: &mut Dnp,
        hops: &impl Forwarding,
        ports: &mut PortRegistry,
        now: Instant,
    ) {
        // Services share the node's cleanup cadence; avoid double work
        // when two passes land close together.
        if let Some(last) = self.last_cleanup {
            if now.duration_since(last) < CLEANUP_THROTTLE {
                return;
            }
        }

        let mut failed = Vec::new();
        for (&port, connection) in &mut self.connections {
            match connection.cleanup(dnp, hops, now) {
                Ok(()) => {}
                Err(err @ (Error::HandshakeExhausted | Error::ConnectionBroken)) => {
                    log::warn!(
                        "[SP] connection broken: {} to node {} ({})",
                        port,
                        connection.peer_id(),
                        err
                    );
                    failed.push(port);
                }
                Err(err) => {
                    log::error!("[SP] connection {} cleanup error: {}", port, err);
                }
            }
        }

        for port in failed {
            self.remove_connection(ports, port);
        }
        self.last_cleanup = Some(now);
    }

    fn remove_connection(&mut self, ports: &mut PortRegistry, port: PortId) {
        self.connections.remove(&port);
        ports.release(port);
        if self.send_connection == Some(port) {
            self.send_connection = None;
        }
    }

    /// Established connections, rendered like the `connections` command.
    #[must_use]
    pub fn connection_string(&self) -> String {
        let established: Vec<String> = self
            .connections
            .values()
            .filter(|connection| connection.is_established())
            .map(|connection| {
                format!(
                    "NodeID: {} Port Number: {} Window: {}",
                    connection.peer_id(),
                    connection.peer_port().unwrap_or(0),
                    connection.window()
                )
            })
            .collect();

        if established.is_empty() {
            "No connections".to_string()
        } else {
            established.join("\n")
        }
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Connection registered at `port`, if any.
    #[must_use]
    pub fn connection(&self, port: PortId) -> Option<&Connection> {
        self.connections.get(&port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dnp::Dnp;
    use crate::rtp::Stage;
    use crate::topology::{LinkTable, Topology};
    use std::rc::Rc;

    const TOPOLOGY: &str = "\
1 127.0.0.1 14001 2 3 10000
2 127.0.0.1 14002 1 3 10000
3 127.0.0.1 14003 1 2 10000
";

    struct DirectRouter;

    impl Forwarding for DirectRouter {
        fn next_hop(&self, target: NodeId, _link_only: bool) -> Result<NodeId> {
            if target <= 3 {
                Ok(target)
            } else {
                Err(Error::Unreachable(target))
            }
        }
    }

    fn dnp_for(node_id: NodeId) -> Dnp {
        let topology = Topology::parse(TOPOLOGY).expect("parse");
        let links = Rc::new(LinkTable::from_topology(&topology, node_id).expect("links"));
        Dnp::new(links)
    }

    fn request_packet(listen_port: PortId, window: &str) -> Delivery {
        Delivery {
            dest_port: listen_port,
            source_id: 1,
            source_port: 77,
            body: Segment::new(SegmentKind::Request, 0, 0, window.as_bytes().to_vec()).encode(),
        }
    }

    #[test]
    fn test_request_spawns_responder_connection() {
        let root = tempfile::tempdir().expect("tempdir");
        let mut dnp = dnp_for(2);
        let mut ports = PortRegistry::with_seed(1);
        let mut point = ServicePoint::new(2, 40, 3, root.path()).expect("service point");
        let now = Instant::now();

        point
            .serve(&mut dnp, &DirectRouter, &mut ports, &request_packet(40, "7"), now)
            .expect("serve");

        assert_eq!(point.connection_count(), 1);
        let (&port, connection) = point
            .connections
            .iter()
            .next()
            .expect("one connection");
        assert_eq!(connection.stage(), Stage::Accepting);
        assert_eq!(connection.window(), 7);
        assert_eq!(connection.peer_port(), Some(77));
        assert_eq!(ports.owner_of(port), Some(40));
        // The ACCEPT went out immediately.
        assert_eq!(dnp.outbound_len(), 1);
    }

    #[test]
    fn test_capacity_limit_rejects_requests() {
        let root = tempfile::tempdir().expect("tempdir");
        let mut dnp = dnp_for(2);
        let mut ports = PortRegistry::with_seed(1);
        let mut point = ServicePoint::new(2, 40, 1, root.path()).expect("service point");
        let now = Instant::now();

        point
            .serve(&mut dnp, &DirectRouter, &mut ports, &request_packet(40, "5"), now)
            .expect("first accepted");
        let second = point.serve(
            &mut dnp,
            &DirectRouter,
            &mut ports,
            &request_packet(40, "5"),
            now,
        );
        assert!(matches!(second, Err(Error::InvalidArgument(_))));
        assert_eq!(point.connection_count(), 1);
    }

    #[test]
    fn test_unreachable_target_fails_without_datagram() {
        let root = tempfile::tempdir().expect("tempdir");
        let mut dnp = dnp_for(2);
        let mut ports = PortRegistry::with_seed(1);
        let mut point = ServicePoint::new(2, 40, 3, root.path()).expect("service point");
        let now = Instant::now();

        let result =
            point.start_connection(&mut dnp, &DirectRouter, &mut ports, 9, 10, 5, now);
        assert!(matches!(result, Err(Error::Unreachable(9))));
        assert_eq!(dnp.outbound_len(), 0);
        assert_eq!(point.connection_count(), 0);
    }

    #[test]
    fn test_exhausted_connection_removed_on_cleanup() {
        let root = tempfile::tempdir().expect("tempdir");
        let mut dnp = dnp_for(2);
        let mut ports = PortRegistry::with_seed(1);
        let mut point = ServicePoint::new(2, 40, 3, root.path()).expect("service point");
        let start = Instant::now();

        let port = point
            .start_connection(&mut dnp, &DirectRouter, &mut ports, 1, 10, 5, start)
            .expect("start");
        assert!(ports.is_used(port));

        // No peer ever answers; the request budget drains tick by tick.
        let mut now = start;
        for _ in 0..8 {
            now += crate::config::RTP_TIMEOUT;
            point.cleanup(&mut dnp, &DirectRouter, &mut ports, now);
        }

        assert_eq!(point.connection_count(), 0);
        assert!(!ports.is_used(port));
        assert_eq!(point.connection_string(), "No connections");
    }

    #[test]
    fn test_dispatch_to_unknown_port_is_harmless() {
        let root = tempfile::tempdir().expect("tempdir");
        let mut dnp = dnp_for(2);
        let mut ports = PortRegistry::with_seed(1);
        let mut point = ServicePoint::new(2, 40, 3, root.path()).expect("service point");
        let now = Instant::now();

        let packet = Delivery {
            dest_port: 123,
            source_id: 1,
            source_port: 77,
            body: Segment::control(SegmentKind::Ak).encode(),
        };
        point
            .serve(&mut dnp, &DirectRouter, &mut ports, &packet, now)
            .expect("serve");
        assert_eq!(point.connection_count(), 0);
    }
}
