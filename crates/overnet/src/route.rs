// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Distance-vector routing with heartbeat liveness.
//!
//! Each node keeps two tables: the *stable* table forwarders read, and
//! the *unstable* table advertisements mutate. The unstable table is
//! promoted to stable as one atomic copy after a quiet period, so a
//! forwarder never observes a half-applied update.
//!
//! Liveness is heartbeat-driven: every `heartbeat_interval` the node
//! probes each neighbor (type 1, TTL 1) and advertises its unstable
//! table (type 3). A neighbor that misses more than `ping_max` probes
//! is deactivated and every route through it is purged. Targets whose
//! route was killed by an advertisement are quarantined in
//! `recently_killed` for `replace_interval`, so a lagging neighbor
//! cannot resurrect a dead route before the news of its death spreads.
//!
//! # Wire format
//!
//! ASCII `"type;payload"`:
//!
//! ```text
//! 1;                          heartbeat
//! 2;                          heartbeat reply
//! 3;target,cost;target,cost;  advertisement (unstable table dump)
//! ```

use crate::config::{
    HEARTBEAT_INTERVAL, PING_MAX, REPLACE_INTERVAL, ROUTE_PORT, STABILIZE_INTERVAL,
};
use crate::dnp::{Delivery, Dnp, Forwarding};
use crate::topology::LinkTable;
use crate::{Error, NodeId, PortId, Result};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// One routing table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteEntry {
    pub next_hop: NodeId,
    pub cost: u32,
}

/// Distance-vector routing state of one node.
pub struct Route {
    node_id: NodeId,
    service_id: PortId,
    links: Rc<LinkTable>,

    /// Table forwarders read. Replaced wholesale by `stabilize`.
    stable: BTreeMap<NodeId, RouteEntry>,
    /// Table advertisements mutate.
    unstable: BTreeMap<NodeId, RouteEntry>,

    active: BTreeMap<NodeId, bool>,
    ping_count: BTreeMap<NodeId, u32>,
    last_alive: BTreeMap<NodeId, Option<Instant>>,
    recently_killed: BTreeMap<NodeId, Instant>,

    last_beat: Option<Instant>,
    last_update: Instant,

    heartbeat_interval: Duration,
    stabilize_interval: Duration,
    replace_interval: Duration,
    ping_max: u32,
}

impl Route {
    pub fn new(links: Rc<LinkTable>, now: Instant) -> Self {
        Self::with_intervals(
            links,
            now,
            HEARTBEAT_INTERVAL,
            STABILIZE_INTERVAL,
            REPLACE_INTERVAL,
        )
    }

    pub fn with_intervals(
        links: Rc<LinkTable>,
        now: Instant,
        heartbeat_interval: Duration,
        stabilize_interval: Duration,
        replace_interval: Duration,
    ) -> Self {
        let node_id = links.node_id();
        let self_entry = RouteEntry {
            next_hop: node_id,
            cost: 0,
        };

        let mut active = BTreeMap::new();
        let mut ping_count = BTreeMap::new();
        let mut last_alive = BTreeMap::new();
        for neighbor in links.neighbor_ids() {
            active.insert(neighbor, false);
            ping_count.insert(neighbor, 0);
            last_alive.insert(neighbor, None);
        }

        // Neighbors earn their table entries by answering a heartbeat;
        // until then only the self route exists.
        Self {
            node_id,
            service_id: ROUTE_PORT,
            links,
            stable: BTreeMap::from([(node_id, self_entry)]),
            unstable: BTreeMap::from([(node_id, self_entry)]),
            active,
            ping_count,
            last_alive,
            recently_killed: BTreeMap::new(),
            last_beat: None,
            last_update: now,
            heartbeat_interval,
            stabilize_interval,
            replace_interval,
            ping_max: PING_MAX,
        }
    }

    /// Handle one inbound routing packet.
    pub fn serve(&mut self, dnp: &mut Dnp, packet: &Delivery, now: Instant) -> Result<()> {
        let message = String::from_utf8_lossy(&packet.body);
        let Some((kind, payload)) = message.split_once(';') else {
            log::debug!("[ROUTE] malformed routing packet from {}", packet.source_id);
            return Ok(());
        };
        let source_id = packet.source_id;

        match kind {
            "1" => {
                log::debug!("[ROUTE] got heartbeat from: {}", source_id);
                self.send_link(dnp, "2;", source_id);
            }
            "2" => {
                log::debug!("[ROUTE] heartbeat response from: {}", source_id);
                self.neighbor_alive(source_id, now);
            }
            "3" => {
                let advertisement = parse_advertisement(payload);
                self.update_routing(source_id, &advertisement, now);
            }
            other => {
                log::debug!("[ROUTE] unknown routing packet type: {}", other);
            }
        }
        Ok(())
    }

    /// A heartbeat reply arrived: reactivate the link if it was down.
    fn neighbor_alive(&mut self, source_id: NodeId, now: Instant) {
        let Some(active) = self.active.get_mut(&source_id) else {
            log::debug!("[ROUTE] heartbeat reply from non-neighbor {}", source_id);
            return;
        };

        if !*active {
            log::warn!("[ROUTE] link alive: {}", source_id);
            self.unstable.insert(
                source_id,
                RouteEntry {
                    next_hop: source_id,
                    cost: 1,
                },
            );
            self.last_update = now;
        }

        *active = true;
        self.last_alive.insert(source_id, Some(now));
        self.ping_count.insert(source_id, 0);
    }

    /// Fold one advertisement into the unstable table.
    ///
    /// An entry routed through the sender whose target is absent from
    /// the advertisement is dead: remove it and quarantine the target.
    /// Offered routes beat existing ones on cost, then on lower sender
    /// id (the deterministic tie-break every node agrees on).
    fn update_routing(&mut self, source_id: NodeId, advertisement: &[(NodeId, u32)], now: Instant) {
        // Phantom update: the sender is not (known to be) alive.
        if !self.active.get(&source_id).copied().unwrap_or(false) {
            return;
        }

        let mut updated = false;

        let dead: Vec<NodeId> = self
            .unstable
            .iter()
            .filter(|(target, entry)| {
                entry.next_hop == source_id
                    && **target != self.node_id
                    && !advertisement.iter().any(|(ad_target, _)| ad_target == *target)
            })
            .map(|(target, _)| *target)
            .collect();
        for target in dead {
            log::debug!("[ROUTE] route to {} died via {}", target, source_id);
            self.unstable.remove(&target);
            self.recently_killed.insert(target, now);
            updated = true;
        }

        for &(target, cost) in advertisement {
            let ad_cost = cost + 1;

            if self.recently_killed.contains_key(&target) {
                continue;
            }

            match self.unstable.get(&target) {
                None => {
                    self.unstable.insert(
                        target,
                        RouteEntry {
                            next_hop: source_id,
                            cost: ad_cost,
                        },
                    );
                    updated = true;
                }
                Some(current) => {
                    let better = ad_cost < current.cost
                        || (ad_cost == current.cost && source_id < current.next_hop);
                    if better {
                        self.unstable.insert(
                            target,
                            RouteEntry {
                                next_hop: source_id,
                                cost: ad_cost,
                            },
                        );
                        updated = true;
                    }
                }
            }
        }

        if updated {
            self.last_update = now;
        }
    }

    /// Periodic maintenance: heartbeats, liveness checks, advertisement
    /// fan-out, quarantine expiry and table stabilization.
    pub fn cleanup(&mut self, dnp: &mut Dnp, now: Instant) {
        let beat_due = self
            .last_beat
            .map_or(true, |last| now.duration_since(last) > self.heartbeat_interval);

        if beat_due {
            for neighbor in self.links.neighbor_ids() {
                self.send_link(dnp, "1;", neighbor);

                let count = self.ping_count.entry(neighbor).or_insert(0);
                *count += 1;
                if *count > self.ping_max && self.active.get(&neighbor) == Some(&true) {
                    *count = 0;
                    self.active.insert(neighbor, false);
                    log::warn!("[ROUTE] link dead: {}", neighbor);

                    let through: Vec<NodeId> = self
                        .unstable
                        .iter()
                        .filter(|(_, entry)| entry.next_hop == neighbor)
                        .map(|(target, _)| *target)
                        .collect();
                    for target in through {
                        self.unstable.remove(&target);
                    }
                    self.last_update = now;
                }
            }

            self.send_advertisement(dnp);
            self.last_beat = Some(now);
        }

        let replace_interval = self.replace_interval;
        self.recently_killed
            .retain(|_, killed| now.duration_since(*killed) <= replace_interval);

        if now.duration_since(self.last_update) > self.stabilize_interval {
            self.stabilize();
        }
    }

    /// Promote the unstable table to stable as one atomic copy.
    fn stabilize(&mut self) {
        self.stable = self.unstable.clone();
        log::debug!(
            "[ROUTE] routing table updated: {}",
            self.routing_table_string(" ")
        );
    }

    /// Advertise the full unstable table to every neighbor.
    fn send_advertisement(&mut self, dnp: &mut Dnp) {
        let mut message = String::from("3;");
        for (target, entry) in &self.unstable {
            message.push_str(&format!("{},{};", target, entry.cost));
        }
        for neighbor in self.links.neighbor_ids() {
            self.send_link(dnp, &message, neighbor);
        }
    }

    /// Link-only send with TTL 1. Failures only get a debug line; the
    /// next tick re-sends.
    fn send_link(&self, dnp: &mut Dnp, message: &str, neighbor: NodeId) {
        if let Err(err) = dnp.send(
            self,
            message.as_bytes(),
            neighbor,
            self.service_id,
            self.service_id,
            Some(1),
            true,
        ) {
            log::debug!("[ROUTE] send to neighbor {} failed: {}", neighbor, err);
        }
    }

    /// Render the stable table, one entry per `sep`.
    #[must_use]
    pub fn routing_table_string(&self, sep: &str) -> String {
        let entries: Vec<String> = self
            .stable
            .iter()
            .map(|(target, entry)| {
                format!(
                    "Target--{}--NextHop--{}--Cost--{}",
                    target, entry.next_hop, entry.cost
                )
            })
            .collect();
        entries.join(sep)
    }

    /// Whether a neighbor link is currently considered alive.
    #[must_use]
    pub fn is_active(&self, neighbor: NodeId) -> bool {
        self.active.get(&neighbor).copied().unwrap_or(false)
    }

    /// Stable-table entry for `target`, if any.
    #[must_use]
    pub fn entry(&self, target: NodeId) -> Option<RouteEntry> {
        self.stable.get(&target).copied()
    }
}

impl Forwarding for Route {
    fn next_hop(&self, target: NodeId, link_only: bool) -> Result<NodeId> {
        if target == self.node_id {
            return Ok(target);
        }
        if link_only {
            return Ok(target);
        }
        self.stable
            .get(&target)
            .map(|entry| entry.next_hop)
            .ok_or(Error::Unreachable(target))
    }
}

/// Parse `target,cost;target,cost;...`, skipping empty tokens.
fn parse_advertisement(payload: &str) -> Vec<(NodeId, u32)> {
    payload
        .split(';')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (target, cost) = pair.split_once(',')?;
            Some((target.parse().ok()?, cost.parse().ok()?))
        })
        .collect()
}
