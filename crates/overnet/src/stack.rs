// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-node protocol stack: dispatch, cleanup and command operations.
//!
//! `Stack` owns every protocol component of one node - DNP, routing,
//! the console message service and the service points - and threads
//! the borrows between them. It is the whole node minus its socket and
//! terminal: the binary's event loop wraps it, and integration tests
//! drive several stacks directly by ferrying their queued datagrams.

use crate::config::{CONTENT_ROOT, MESSAGE_PORT, ROUTE_PORT};
use crate::dnp::{DeliveryOutcome, Delivery, Dnp, Forwarding, Outbound};
use crate::route::Route;
use crate::service::message::Message;
use crate::service::point::ServicePoint;
use crate::service::PortRegistry;
use crate::topology::{LinkInfo, LinkTable};
use crate::{Error, NodeId, PortId, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Instant;

/// One row of the `links` command output.
#[derive(Debug, Clone)]
pub struct LinkStatus {
    pub neighbor_id: NodeId,
    pub addr: std::net::SocketAddr,
    pub mtu: u32,
    /// Administratively up (not `downLink`ed).
    pub up: bool,
}

/// The protocol stack of one node.
pub struct Stack {
    node_id: NodeId,
    links: Rc<LinkTable>,
    dnp: Dnp,
    router: Route,
    console: Message,
    service_points: BTreeMap<PortId, ServicePoint>,
    ports: PortRegistry,
    link_down: BTreeSet<NodeId>,
    content_root: PathBuf,
}

impl Stack {
    pub fn new(links: Rc<LinkTable>, now: Instant) -> Self {
        Self::with_content_root(links, now, PathBuf::from(CONTENT_ROOT))
    }

    pub fn with_content_root(links: Rc<LinkTable>, now: Instant, content_root: PathBuf) -> Self {
        let node_id = links.node_id();
        Self {
            node_id,
            dnp: Dnp::new(Rc::clone(&links)),
            router: Route::new(Rc::clone(&links), now),
            console: Message::new(MESSAGE_PORT),
            service_points: BTreeMap::new(),
            ports: PortRegistry::new(),
            link_down: BTreeSet::new(),
            content_root,
            links,
        }
    }

    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    #[must_use]
    pub fn links(&self) -> &LinkTable {
        &self.links
    }

    #[must_use]
    pub fn router(&self) -> &Route {
        &self.router
    }

    /// Deterministic port minting for tests.
    pub fn seed_ports(&mut self, seed: u64) {
        self.ports = PortRegistry::with_seed(seed);
    }

    // =======================================================================
    // Inbound path
    // =======================================================================

    /// Feed one raw datagram from the channel through DNP and dispatch
    /// any completed delivery to its service.
    pub fn handle_datagram(&mut self, datagram: &[u8], now: Instant) {
        match self.dnp.unpack(&self.router, datagram, now) {
            DeliveryOutcome::Deliver(packet) => self.dispatch(packet, now),
            DeliveryOutcome::Forwarded(_)
            | DeliveryOutcome::Buffering
            | DeliveryOutcome::Dropped(_) => {}
        }
    }

    /// Hand a delivery to the service bound to its destination port.
    fn dispatch(&mut self, packet: Delivery, now: Instant) {
        // Routing chatter would swamp the log.
        if packet.source_port != ROUTE_PORT {
            log::info!(
                "[NODE] got packet: port {} from node {} port {}",
                packet.dest_port,
                packet.source_id,
                packet.source_port
            );
            log::debug!(
                "[NODE] contents: {}",
                String::from_utf8_lossy(&packet.body)
            );
        }

        match packet.dest_port {
            ROUTE_PORT => {
                if let Err(err) = self.router.serve(&mut self.dnp, &packet, now) {
                    log::error!("[NODE] routing error: {}", err);
                }
            }
            MESSAGE_PORT => self.console.serve(&packet),
            port => {
                let owner = self.ports.owner_of(port);
                let point = match owner {
                    Some(owner) => self.service_points.get_mut(&owner),
                    None => None,
                };
                match point {
                    Some(point) => {
                        if let Err(err) =
                            point.serve(&mut self.dnp, &self.router, &mut self.ports, &packet, now)
                        {
                            log::error!("[NODE] unexpected error: {}", err);
                        }
                    }
                    None => {
                        log::info!(
                            "[NODE] service does not exist: {} requested by: {}",
                            port,
                            packet.source_id
                        );
                    }
                }
            }
        }
    }

    // =======================================================================
    // Outbound path and maintenance
    // =======================================================================

    /// Drain the send queue, discarding entries for administratively
    /// down links and datagrams larger than the neighbor's MTU.
    pub fn drain_send_list(&mut self) -> Vec<Outbound> {
        let link_down = &self.link_down;
        let links = &self.links;
        self.dnp
            .drain_outbound()
            .into_iter()
            .filter(|item| {
                if link_down.contains(&item.neighbor) {
                    log::debug!("[NODE] dropping packet for downed link {}", item.neighbor);
                    return false;
                }
                match links.mtu(item.neighbor) {
                    Ok(mtu) if item.datagram.len() <= mtu as usize => true,
                    _ => {
                        log::debug!(
                            "[NODE] dropping oversized packet for link {} ({} bytes)",
                            item.neighbor,
                            item.datagram.len()
                        );
                        false
                    }
                }
            })
            .collect()
    }

    /// Run one cleanup pass over routing, every service point and DNP.
    pub fn cleanup(&mut self, now: Instant) {
        self.router.cleanup(&mut self.dnp, now);
        for point in self.service_points.values_mut() {
            point.cleanup(&mut self.dnp, &self.router, &mut self.ports, now);
        }
        self.dnp.cleanup(now);
    }

    // =======================================================================
    // Command operations
    // =======================================================================

    /// `message <id> <text>`.
    pub fn send_message(&mut self, target_id: NodeId, text: &str) {
        self.console.send(&mut self.dnp, &self.router, target_id, text);
    }

    /// Messages delivered to this node's console since the last call.
    pub fn take_messages(&mut self) -> Vec<(NodeId, String)> {
        self.console.take_received()
    }

    /// `routing`: the stable table, one entry per line.
    #[must_use]
    pub fn routing_table(&self) -> String {
        self.router.routing_table_string("\n")
    }

    /// `downLink <id>`.
    pub fn down_link(&mut self, neighbor_id: NodeId) -> Result<()> {
        if !self.links.is_neighbor(neighbor_id) {
            return Err(Error::NotLinked(neighbor_id));
        }
        if !self.link_down.insert(neighbor_id) {
            return Err(Error::InvalidArgument("link is already down".into()));
        }
        log::warn!("[NODE] link downed: {}", neighbor_id);
        Ok(())
    }

    /// `upLink <id>`.
    pub fn up_link(&mut self, neighbor_id: NodeId) -> Result<()> {
        if !self.links.is_neighbor(neighbor_id) {
            return Err(Error::NotLinked(neighbor_id));
        }
        if !self.link_down.remove(&neighbor_id) {
            return Err(Error::InvalidArgument("link not down".into()));
        }
        log::warn!("[NODE] link reactivated: {}", neighbor_id);
        Ok(())
    }

    /// `startService <max_connections>`: returns the new listen port.
    pub fn start_service(&mut self, max_connections: usize) -> Result<PortId> {
        let service_id = self.ports.mint_listen()?;
        match ServicePoint::new(self.node_id, service_id, max_connections, &self.content_root) {
            Ok(point) => {
                self.service_points.insert(service_id, point);
                Ok(service_id)
            }
            Err(err) => {
                self.ports.release(service_id);
                Err(err)
            }
        }
    }

    /// `connectTo <target> <listen_port> <window>`: returns the id of
    /// the single-connection service point created for the connection.
    pub fn connect_to(
        &mut self,
        target_id: NodeId,
        listen_port: PortId,
        window: u32,
        now: Instant,
    ) -> Result<PortId> {
        let service_id = self.ports.mint_listen()?;
        let mut point = match ServicePoint::new(self.node_id, service_id, 1, &self.content_root) {
            Ok(point) => point,
            Err(err) => {
                self.ports.release(service_id);
                return Err(err);
            }
        };

        match point.start_connection(
            &mut self.dnp,
            &self.router,
            &mut self.ports,
            target_id,
            listen_port,
            window,
            now,
        ) {
            Ok(_) => {
                self.service_points.insert(service_id, point);
                Ok(service_id)
            }
            Err(err) => {
                self.ports.release(service_id);
                Err(err)
            }
        }
    }

    /// `download <connection_id> <file_name>`.
    pub fn download(&mut self, connection_id: PortId, file_name: &str, now: Instant) -> Result<()> {
        let point = self
            .service_points
            .get_mut(&connection_id)
            .ok_or_else(|| Error::InvalidArgument("no connection with that id".into()))?;
        point.file_request(&mut self.dnp, &self.router, file_name, now)
    }

    /// `services`: ids of the active service points.
    #[must_use]
    pub fn service_ids(&self) -> Vec<PortId> {
        self.service_points.keys().copied().collect()
    }

    /// `connections <service_id>`.
    pub fn connection_string(&self, service_id: PortId) -> Result<String> {
        self.service_points
            .get(&service_id)
            .map(ServicePoint::connection_string)
            .ok_or_else(|| Error::InvalidArgument("no service id with that number".into()))
    }

    /// Service point registered at `service_id`, if any.
    #[must_use]
    pub fn service_point(&self, service_id: PortId) -> Option<&ServicePoint> {
        self.service_points.get(&service_id)
    }

    /// `links`: per-neighbor status rows.
    #[must_use]
    pub fn link_status(&self) -> Vec<LinkStatus> {
        self.links
            .neighbors()
            .map(|link: &LinkInfo| LinkStatus {
                neighbor_id: link.neighbor_id,
                addr: link.addr,
                mtu: link.mtu,
                up: !self.link_down.contains(&link.neighbor_id),
            })
            .collect()
    }

    /// Direct access for tests and the probe tool.
    #[must_use]
    pub fn next_hop(&self, target: NodeId) -> Result<NodeId> {
        self.router.next_hop(target, false)
    }
}
