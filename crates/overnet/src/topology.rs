// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topology file parsing and the per-node link table.
//!
//! The topology file is plain text, one node per line:
//!
//! ```text
//! <node_id> <ip> <port> <neighbor1_id> <neighbor2_id> <link_mtu>
//! ```
//!
//! Every node has exactly two neighbors. Each node consults the file at
//! startup to build its [`LinkTable`]: its own socket address plus the
//! address and MTU of each directly linked neighbor. Link attributes are
//! immutable for the lifetime of the node.

use crate::config::LOCAL_MTU;
use crate::{Error, NodeId, Result};
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

/// One line of the topology file.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub neighbors: [NodeId; 2],
    pub mtu: u32,
}

/// The parsed topology file.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: BTreeMap<NodeId, NodeSpec>,
}

impl Topology {
    /// Load and parse a topology file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse topology text. Blank lines are ignored.
    pub fn parse(text: &str) -> Result<Self> {
        let mut nodes = BTreeMap::new();

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 6 {
                return Err(Error::InvalidArgument(format!(
                    "topology line {}: expected 6 fields, got {}",
                    lineno + 1,
                    fields.len()
                )));
            }

            let id = parse_field(fields[0], lineno, "node id")?;
            let port: u16 = parse_field(fields[2], lineno, "port")?;
            let addr: SocketAddr = format!("{}:{}", fields[1], port).parse().map_err(|_| {
                Error::InvalidArgument(format!(
                    "topology line {}: bad address {}:{}",
                    lineno + 1,
                    fields[1],
                    port
                ))
            })?;
            let neighbors = [
                parse_field(fields[3], lineno, "neighbor id")?,
                parse_field(fields[4], lineno, "neighbor id")?,
            ];
            let mtu = parse_field(fields[5], lineno, "mtu")?;

            nodes.insert(
                id,
                NodeSpec {
                    id,
                    addr,
                    neighbors,
                    mtu,
                },
            );
        }

        Ok(Self { nodes })
    }

    /// Look up a node entry.
    pub fn node(&self, id: NodeId) -> Result<&NodeSpec> {
        self.nodes
            .get(&id)
            .ok_or_else(|| Error::InvalidArgument(format!("node id not in topology: {}", id)))
    }

    /// Ids of every node in the file, ascending.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Number of nodes described by the file.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, lineno: usize, what: &str) -> Result<T> {
    field.parse().map_err(|_| {
        Error::InvalidArgument(format!(
            "topology line {}: bad {}: {}",
            lineno + 1,
            what,
            field
        ))
    })
}

/// Per-link attributes of a direct neighbor.
#[derive(Debug, Clone)]
pub struct LinkInfo {
    pub neighbor_id: NodeId,
    pub addr: SocketAddr,
    pub mtu: u32,
}

/// Immutable link table of one node: own address plus both neighbors.
///
/// Shared read-only by DNP (fragment sizing, enqueue addressing), ROUTE
/// (heartbeat fan-out) and the node loop (down-link/MTU filtering).
#[derive(Debug)]
pub struct LinkTable {
    node_id: NodeId,
    local_addr: SocketAddr,
    neighbors: BTreeMap<NodeId, LinkInfo>,
}

impl LinkTable {
    /// Build the link table for `node_id` from a parsed topology.
    ///
    /// The MTU of a link is the MTU listed on the *neighbor's* line, as
    /// the topology reader has always resolved it.
    pub fn from_topology(topology: &Topology, node_id: NodeId) -> Result<Self> {
        let own = topology.node(node_id)?;

        let mut neighbors = BTreeMap::new();
        for neighbor_id in own.neighbors {
            let spec = topology.node(neighbor_id)?;
            neighbors.insert(
                neighbor_id,
                LinkInfo {
                    neighbor_id,
                    addr: spec.addr,
                    mtu: spec.mtu,
                },
            );
        }

        Ok(Self {
            node_id,
            local_addr: own.addr,
            neighbors,
        })
    }

    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Direct neighbors in id order.
    pub fn neighbors(&self) -> impl Iterator<Item = &LinkInfo> {
        self.neighbors.values()
    }

    /// Ids of the direct neighbors, ascending.
    #[must_use]
    pub fn neighbor_ids(&self) -> Vec<NodeId> {
        self.neighbors.keys().copied().collect()
    }

    #[must_use]
    pub fn is_neighbor(&self, id: NodeId) -> bool {
        self.neighbors.contains_key(&id)
    }

    /// Link attributes of a direct neighbor.
    pub fn link(&self, id: NodeId) -> Result<&LinkInfo> {
        self.neighbors.get(&id).ok_or(Error::NotLinked(id))
    }

    /// Socket address for sending toward `id` (self included).
    pub fn addr(&self, id: NodeId) -> Result<SocketAddr> {
        if id == self.node_id {
            return Ok(self.local_addr);
        }
        Ok(self.link(id)?.addr)
    }

    /// MTU of the link toward `id`. Loopback uses [`LOCAL_MTU`].
    pub fn mtu(&self, id: NodeId) -> Result<u32> {
        if id == self.node_id {
            return Ok(LOCAL_MTU);
        }
        Ok(self.link(id)?.mtu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE_LINE: &str = "\
1 127.0.0.1 10001 2 3 200
2 127.0.0.1 10002 1 3 150
3 127.0.0.1 10003 1 2 200
";

    #[test]
    fn test_parse_three_nodes() {
        let topology = Topology::parse(THREE_LINE).expect("parse should succeed");
        assert_eq!(topology.len(), 3);

        let node = topology.node(2).expect("node 2 present");
        assert_eq!(node.addr.to_string(), "127.0.0.1:10002");
        assert_eq!(node.neighbors, [1, 3]);
        assert_eq!(node.mtu, 150);
    }

    #[test]
    fn test_missing_node_rejected() {
        let topology = Topology::parse(THREE_LINE).expect("parse should succeed");
        assert!(matches!(topology.node(9), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_short_line_rejected() {
        let result = Topology::parse("1 127.0.0.1 10001 2 3\n");
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_bad_port_rejected() {
        let result = Topology::parse("1 127.0.0.1 notaport 2 3 200\n");
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_link_table_uses_neighbor_mtu() {
        let topology = Topology::parse(THREE_LINE).expect("parse should succeed");
        let links = LinkTable::from_topology(&topology, 1).expect("link table");

        assert_eq!(links.node_id(), 1);
        assert_eq!(links.neighbor_ids(), vec![2, 3]);
        // MTU comes from the neighbor's own line.
        assert_eq!(links.mtu(2).expect("linked"), 150);
        assert_eq!(links.mtu(3).expect("linked"), 200);
        assert_eq!(links.mtu(1).expect("self"), LOCAL_MTU);
        assert!(matches!(links.mtu(9), Err(Error::NotLinked(9))));
    }

    #[test]
    fn test_link_table_addresses() {
        let topology = Topology::parse(THREE_LINE).expect("parse should succeed");
        let links = LinkTable::from_topology(&topology, 3).expect("link table");

        assert_eq!(links.addr(3).expect("self"), links.local_addr());
        assert_eq!(links.addr(1).expect("linked").to_string(), "127.0.0.1:10001");
        assert!(!links.is_neighbor(3));
    }
}
