// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTP - the reliable transport protocol.
//!
//! One [`Connection`] is one endpoint of a reliable byte-stream between
//! two nodes, multiplexed over DNP by `(node, port)` pairs. A transfer
//! moves one logical message: the sender chunks it into CONTENT
//! segments, keeps them queued until each is AKed, and retransmits the
//! `window` lowest outstanding sequence numbers every maintenance tick.
//! The receiver buffers segments in sequence order and AKs every
//! arrival, so delivery survives loss, duplication and reordering.
//!
//! # Connection state machine
//!
//! ```text
//!  initiator: REQUESTING --(recv ACCEPT)--> FINALIZING --(quiescent)--> ACTIVE
//!  responder: ACCEPTING --(recv FINALIZE)--> ACTIVE
//!  any stage: retry counter exhausted -> HandshakeExhausted
//! ```
//!
//! The initiator cannot observe the responder's transition, so it calls
//! the connection ACTIVE once it has re-sent FINALIZE for a full
//! `accept_max x timeout` window without another ACCEPT arriving; each
//! ACCEPT restarts that window. Stages only ever advance.
//!
//! Within ACTIVE, content or AK silence longer than
//! [`BROKEN_TICKS`] x timeout declares the connection broken; shorter
//! silences only retransmit.

pub mod content;
pub mod wire;

use crate::config::{
    ACCEPT_MAX, BROKEN_TICKS, FINALIZE_MAX, REQUEST_MAX, RTP_TIMEOUT, SEGMENT_MAX,
};
use crate::dnp::{Delivery, Dnp, Forwarding};
use crate::{Error, NodeId, PortId, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use wire::{Segment, SegmentKind};

/// Connection lifecycle position. Never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Requesting,
    Accepting,
    Finalizing,
    Active,
}

/// One endpoint of a reliable connection.
pub struct Connection {
    local_port: PortId,
    peer_id: NodeId,
    /// Learned from the peer's source port during the handshake.
    peer_port: Option<PortId>,
    /// Remote listen port the initial REQUEST is addressed to.
    listen_port: PortId,
    stage: Stage,
    window: u32,
    segment_max: usize,
    timeout: Duration,

    request_count: u32,
    accept_count: u32,
    finalize_count: u32,
    /// Start of the current ACCEPT-silence window (initiator only).
    finalizing_since: Option<Instant>,

    // ----- per-transfer trackers (reset between transfers) -----
    start_time: Instant,
    /// Sequence numbers waiting to be AKed, keyed ascending so the
    /// window is the first `window` entries.
    send_queue: BTreeMap<u32, Segment>,
    last_content: Option<Instant>,
    last_ak: Option<Instant>,
    total_size: Option<u32>,
    recv_seqs: Vec<u32>,
    recv_buffer: Vec<Vec<u8>>,
    pending_aks: Vec<u32>,
    done: bool,
    requested: bool,
    file_name: Option<String>,

    content_dir: PathBuf,
    last_clean: Option<Instant>,
}

impl Connection {
    /// Create the initiating endpoint and send the first REQUEST.
    pub fn initiate(
        dnp: &mut Dnp,
        hops: &impl Forwarding,
        local_port: PortId,
        peer_id: NodeId,
        listen_port: PortId,
        window: u32,
        content_dir: PathBuf,
        now: Instant,
    ) -> Result<Self> {
        let mut connection = Self::blank(
            local_port,
            peer_id,
            None,
            listen_port,
            Stage::Requesting,
            window,
            content_dir,
            now,
        );
        connection.request(dnp, hops)?;
        Ok(connection)
    }

    /// Create the responding endpoint for a received REQUEST and send
    /// the first ACCEPT.
    pub fn accept_from(
        dnp: &mut Dnp,
        hops: &impl Forwarding,
        local_port: PortId,
        peer_id: NodeId,
        peer_port: PortId,
        window: u32,
        content_dir: PathBuf,
        now: Instant,
    ) -> Result<Self> {
        let mut connection = Self::blank(
            local_port,
            peer_id,
            Some(peer_port),
            peer_port,
            Stage::Accepting,
            window,
            content_dir,
            now,
        );
        connection.accept(dnp, hops)?;
        Ok(connection)
    }

    #[allow(clippy::too_many_arguments)]
    fn blank(
        local_port: PortId,
        peer_id: NodeId,
        peer_port: Option<PortId>,
        listen_port: PortId,
        stage: Stage,
        window: u32,
        content_dir: PathBuf,
        now: Instant,
    ) -> Self {
        Self {
            local_port,
            peer_id,
            peer_port,
            listen_port,
            stage,
            window,
            segment_max: SEGMENT_MAX,
            timeout: RTP_TIMEOUT,
            request_count: 0,
            accept_count: 0,
            finalize_count: 0,
            finalizing_since: None,
            start_time: now,
            send_queue: BTreeMap::new(),
            last_content: None,
            last_ak: None,
            total_size: None,
            recv_seqs: Vec::new(),
            recv_buffer: Vec::new(),
            pending_aks: Vec::new(),
            done: false,
            requested: false,
            file_name: None,
            content_dir,
            last_clean: None,
        }
    }

    /// Override the maintenance timeout (tests use millisecond ticks).
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    // =======================================================================
    // Inbound
    // =======================================================================

    /// Handle one segment addressed to this connection.
    pub fn serve(
        &mut self,
        dnp: &mut Dnp,
        hops: &impl Forwarding,
        packet: &Delivery,
        now: Instant,
    ) -> Result<()> {
        let segment = match Segment::decode(&packet.body) {
            Ok(segment) => segment,
            Err(err) => {
                log::error!("[RTP] packet not parseable: {}", err);
                return Ok(());
            }
        };

        match segment.kind {
            SegmentKind::Request => {
                if let Ok(window) = String::from_utf8_lossy(&segment.body).parse() {
                    self.window = window;
                }
                self.peer_port = Some(packet.source_port);
                self.accept(dnp, hops)?;
                self.advance(Stage::Accepting);
            }
            SegmentKind::Accept => {
                self.peer_port = Some(packet.source_port);
                // Every ACCEPT restarts the quiescent-confirmation
                // window and with it the FINALIZE retry budget.
                self.finalizing_since = Some(now);
                self.finalize_count = 0;
                self.finalize(dnp, hops, false)?;
                self.advance(Stage::Finalizing);
            }
            SegmentKind::Finalize => {
                if self.stage < Stage::Active {
                    self.advance(Stage::Active);
                    log::warn!("[RTP] established connection to: {}", self.peer_id);
                }
            }
            SegmentKind::Content => self.receive_content(&segment, now),
            SegmentKind::Ak => self.acknowledged(segment.seq, now),
            SegmentKind::FileRequest => self.answer_file_request(dnp, hops, &segment, now),
            SegmentKind::FileResponse => self.file_response(&segment, now),
        }
        Ok(())
    }

    /// Buffer one CONTENT segment and queue its AK.
    fn receive_content(&mut self, segment: &Segment, now: Instant) {
        self.last_content = Some(now);

        if self.total_size.is_none() {
            self.total_size = Some(segment.total);
        }

        if !self.recv_seqs.contains(&segment.seq) {
            let index = self.recv_seqs.partition_point(|&seq| seq < segment.seq);
            self.recv_seqs.insert(index, segment.seq);
            self.recv_buffer.insert(index, segment.body.clone());
        }

        if !self.pending_aks.contains(&segment.seq) {
            self.pending_aks.push(segment.seq);
        }
    }

    /// Drop an AKed segment from the queue; an empty queue ends the send.
    fn acknowledged(&mut self, seq: u32, now: Instant) {
        self.last_ak = Some(now);
        if self.send_queue.remove(&seq).is_some() && self.send_queue.is_empty() {
            self.done = true;
        }
    }

    fn answer_file_request(
        &mut self,
        dnp: &mut Dnp,
        hops: &impl Forwarding,
        segment: &Segment,
        now: Instant,
    ) {
        let name = String::from_utf8_lossy(&segment.body).into_owned();

        match content::load_encoded(&self.content_dir, &name) {
            Err(_) => {
                log::warn!("[RTP] requested file does not exist: {}", name);
                self.transmit(dnp, hops, &Segment::new(SegmentKind::FileResponse, 0, 0, b"DNE".to_vec()));
            }
            Ok(encoded) => match self.send(&encoded, now) {
                Err(err) => {
                    // A transfer is already queued; the peer retries later.
                    log::warn!("[RTP] cannot serve file {}: {}", name, err);
                }
                Ok(()) => {
                    self.window_send(dnp, hops);
                    self.transmit(dnp, hops, &Segment::new(SegmentKind::FileResponse, 0, 0, b"yes".to_vec()));
                }
            },
        }
    }

    fn file_response(&mut self, segment: &Segment, now: Instant) {
        match segment.body.as_slice() {
            b"yes" => {
                // Content is incoming; stop re-asking.
                self.requested = false;
            }
            b"DNE" => {
                self.reset_trackers(now);
                log::warn!("[RTP] download failed, file does not exist");
            }
            other => {
                log::debug!(
                    "[RTP] unexpected file response: {}",
                    String::from_utf8_lossy(other)
                );
            }
        }
    }

    // =======================================================================
    // Outbound
    // =======================================================================

    /// Queue `payload` for reliable transfer.
    ///
    /// # Errors
    /// [`Error::ConnectionBusy`] while a previous transfer is unfinished.
    pub fn send(&mut self, payload: &[u8], now: Instant) -> Result<()> {
        if !self.send_queue.is_empty() {
            return Err(Error::ConnectionBusy);
        }

        self.reset_trackers(now);
        let total = payload.len() as u32;

        // Sequence numbers restart at 1 for every transfer.
        for (index, chunk) in payload.chunks(self.segment_max).enumerate() {
            let seq = index as u32 + 1;
            self.send_queue
                .insert(seq, Segment::new(SegmentKind::Content, seq, total, chunk.to_vec()));
        }
        Ok(())
    }

    /// Ask the peer for a file; re-asked every tick until answered.
    ///
    /// Starts a fresh transfer, so a connection can download again
    /// after a completed or failed attempt.
    pub fn file_request(
        &mut self,
        dnp: &mut Dnp,
        hops: &impl Forwarding,
        name: &str,
        now: Instant,
    ) {
        self.reset_trackers(now);
        self.requested = true;
        self.file_name = Some(name.to_string());
        self.ask(dnp, hops);
    }

    fn ask(&mut self, dnp: &mut Dnp, hops: &impl Forwarding) {
        let Some(name) = self.file_name.clone() else {
            return;
        };
        self.transmit(
            dnp,
            hops,
            &Segment::new(SegmentKind::FileRequest, 0, 0, name.into_bytes()),
        );
    }

    /// Transmit the `window` lowest-sequence queued segments.
    fn window_send(&mut self, dnp: &mut Dnp, hops: &impl Forwarding) {
        let candidates: Vec<u32> = self
            .send_queue
            .keys()
            .take(self.window as usize)
            .copied()
            .collect();
        for seq in candidates {
            if let Some(segment) = self.send_queue.get(&seq).cloned() {
                self.transmit(dnp, hops, &segment);
            }
        }
    }

    /// Send one AK per pending sequence number, then clear the list.
    fn window_ak(&mut self, dnp: &mut Dnp, hops: &impl Forwarding) {
        let pending = std::mem::take(&mut self.pending_aks);
        for seq in pending {
            self.transmit(dnp, hops, &Segment::new(SegmentKind::Ak, seq, 0, Vec::new()));
        }
    }

    /// Best-effort unicast of one segment to the peer endpoint.
    fn transmit(&self, dnp: &mut Dnp, hops: &impl Forwarding, segment: &Segment) {
        let Some(peer_port) = self.peer_port else {
            log::debug!("[RTP] peer port unknown, dropping outbound segment");
            return;
        };
        if let Err(err) = dnp.send(
            hops,
            &segment.encode(),
            self.peer_id,
            peer_port,
            self.local_port,
            None,
            false,
        ) {
            log::debug!("[RTP] send to {} failed: {}", self.peer_id, err);
        }
    }

    // =======================================================================
    // Handshake sends
    // =======================================================================

    fn request(&mut self, dnp: &mut Dnp, hops: &impl Forwarding) -> Result<()> {
        self.request_count += 1;
        if self.request_count > REQUEST_MAX {
            return Err(Error::HandshakeExhausted);
        }

        log::info!("[RTP] requesting connection with: {}", self.peer_id);
        let segment = Segment::new(
            SegmentKind::Request,
            0,
            0,
            self.window.to_string().into_bytes(),
        );
        if let Err(err) = dnp.send(
            hops,
            &segment.encode(),
            self.peer_id,
            self.listen_port,
            self.local_port,
            None,
            false,
        ) {
            log::debug!("[RTP] request send failed: {}", err);
        }
        Ok(())
    }

    fn accept(&mut self, dnp: &mut Dnp, hops: &impl Forwarding) -> Result<()> {
        self.accept_count += 1;
        if self.accept_count > ACCEPT_MAX {
            return Err(Error::HandshakeExhausted);
        }

        log::info!(
            "[RTP] accepting connection from: {} on port: {:?}",
            self.peer_id,
            self.peer_port
        );
        self.transmit(dnp, hops, &Segment::control(SegmentKind::Accept));
        Ok(())
    }

    /// Send FINALIZE. Only tick-driven re-sends (`count`) draw down the
    /// retry budget; ACCEPT-triggered replies restart the budget and
    /// the quiescence window instead. With the maintenance tick no
    /// shorter than `timeout`, quiescence always fires before the
    /// budget can run out.
    fn finalize(&mut self, dnp: &mut Dnp, hops: &impl Forwarding, count: bool) -> Result<()> {
        if count {
            self.finalize_count += 1;
            if self.finalize_count > FINALIZE_MAX {
                return Err(Error::HandshakeExhausted);
            }
        }

        if self.finalizing_since.is_none() {
            self.finalizing_since = Some(self.start_time);
        }

        log::info!("[RTP] finalizing connection with: {}", self.peer_id);
        self.transmit(dnp, hops, &Segment::control(SegmentKind::Finalize));
        Ok(())
    }

    // =======================================================================
    // Maintenance
    // =======================================================================

    /// Periodic per-connection maintenance.
    ///
    /// # Errors
    /// [`Error::HandshakeExhausted`] and [`Error::ConnectionBroken`] tell
    /// the owning service point to discard this connection.
    pub fn cleanup(&mut self, dnp: &mut Dnp, hops: &impl Forwarding, now: Instant) -> Result<()> {
        match self.stage {
            Stage::Requesting => self.request(dnp, hops),
            Stage::Accepting => self.accept(dnp, hops),
            Stage::Finalizing => {
                let quiet = self
                    .finalizing_since
                    .map_or(false, |since| now.duration_since(since) >= self.timeout * ACCEPT_MAX);
                if quiet {
                    self.advance(Stage::Active);
                    log::warn!("[RTP] finalized connection to: {}", self.peer_id);
                    Ok(())
                } else {
                    self.finalize(dnp, hops, true)
                }
            }
            Stage::Active => self.active_cleanup(dnp, hops, now),
        }
    }

    fn active_cleanup(
        &mut self,
        dnp: &mut Dnp,
        hops: &impl Forwarding,
        now: Instant,
    ) -> Result<()> {
        let due = self
            .last_clean
            .map_or(true, |last| now.duration_since(last) > self.timeout);
        if !due {
            return Ok(());
        }
        self.last_clean = Some(now);

        if self.requested {
            self.ask(dnp, hops);
        }

        // AKs flush even after the transfer is done: the peer re-sends
        // any segment whose AK was lost and must be answered, or its
        // queue never drains.
        self.window_ak(dnp, hops);

        if self.done {
            return Ok(());
        }

        let broken_after = self.timeout * BROKEN_TICKS;
        if let Some(last) = self.last_content {
            if now.duration_since(last) > broken_after {
                return Err(Error::ConnectionBroken);
            }
        }
        if let Some(last) = self.last_ak {
            if now.duration_since(last) > broken_after {
                return Err(Error::ConnectionBroken);
            }
        }

        self.window_send(dnp, hops);
        self.save_content(now);
        Ok(())
    }

    /// Concatenated receive buffer, once every byte has arrived.
    #[must_use]
    pub fn complete_payload(&self) -> Option<Vec<u8>> {
        let total = self.total_size? as usize;
        let present: usize = self.recv_buffer.iter().map(Vec::len).sum();
        if present != total {
            return None;
        }
        let mut payload = Vec::with_capacity(total);
        for chunk in &self.recv_buffer {
            payload.extend_from_slice(chunk);
        }
        Some(payload)
    }

    /// Persist a completed file download and log the transfer stats.
    fn save_content(&mut self, now: Instant) {
        if self.recv_buffer.is_empty() {
            return;
        }
        let Some(payload) = self.complete_payload() else {
            return;
        };

        self.done = true;
        self.last_content = None;
        self.requested = false;

        let Some(name) = self.file_name.clone() else {
            return;
        };

        match content::store_decoded(&self.content_dir, &name, &payload) {
            Ok(size) => {
                let elapsed = now.duration_since(self.start_time).as_secs_f64();
                let bandwidth = if elapsed > 0.0 { size as f64 / elapsed } else { size as f64 };
                log::warn!(
                    "[RTP] file downloaded: {} time taken: {:.3}s bandwidth (bytes/second): {:.0}",
                    name,
                    elapsed,
                    bandwidth
                );
            }
            Err(err) => {
                log::error!("[RTP] could not save downloaded file {}: {}", name, err);
            }
        }
    }

    /// Reset per-transfer state; used between transfers.
    fn reset_trackers(&mut self, now: Instant) {
        self.start_time = now;
        self.send_queue.clear();
        self.last_content = None;
        self.last_ak = None;
        self.total_size = None;
        self.recv_seqs.clear();
        self.recv_buffer.clear();
        self.pending_aks.clear();
        self.done = false;
        self.requested = false;
        self.file_name = None;
    }

    /// Stages only ever move forward.
    fn advance(&mut self, to: Stage) {
        if self.stage < to {
            self.stage = to;
        }
    }

    // =======================================================================
    // Accessors
    // =======================================================================

    #[must_use]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    #[must_use]
    pub fn window(&self) -> u32 {
        self.window
    }

    #[must_use]
    pub fn peer_id(&self) -> NodeId {
        self.peer_id
    }

    #[must_use]
    pub fn peer_port(&self) -> Option<PortId> {
        self.peer_port
    }

    #[must_use]
    pub fn local_port(&self) -> PortId {
        self.local_port
    }

    #[must_use]
    pub fn is_established(&self) -> bool {
        self.stage == Stage::Active
    }

    /// Whether the current transfer (either direction) has finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    #[must_use]
    pub fn queued_segments(&self) -> usize {
        self.send_queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HEADER_TOTAL;
    use crate::dnp::DnpHeader;
    use crate::link;
    use crate::topology::{LinkTable, Topology};
    use std::rc::Rc;

    const TOPOLOGY: &str = "\
1 127.0.0.1 13001 2 3 10000
2 127.0.0.1 13002 1 3 10000
3 127.0.0.1 13003 1 2 10000
";

    /// Everyone is everyone's neighbor here; direct routing suffices.
    struct DirectRouter;

    impl Forwarding for DirectRouter {
        fn next_hop(&self, target: NodeId, _link_only: bool) -> Result<NodeId> {
            Ok(target)
        }
    }

    fn dnp_for(node_id: NodeId) -> Dnp {
        let topology = Topology::parse(TOPOLOGY).expect("parse");
        let links = Rc::new(LinkTable::from_topology(&topology, node_id).expect("links"));
        Dnp::new(links)
    }

    fn tick(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }

    /// Decode queued DNP datagrams back into `(dest_port, source_port, Segment)`.
    fn drain_segments(dnp: &mut Dnp) -> Vec<(PortId, PortId, Segment)> {
        dnp.drain_outbound()
            .iter()
            .map(|item| {
                let (_, payload) = link::unpack(&item.datagram).expect("framed");
                let (header, body) = DnpHeader::decode(payload).expect("header");
                assert!(item.datagram.len() >= HEADER_TOTAL);
                (
                    header.dest_port,
                    header.source_port,
                    Segment::decode(body).expect("segment"),
                )
            })
            .collect()
    }

    fn delivery(source_id: NodeId, source_port: PortId, segment: &Segment) -> Delivery {
        Delivery {
            dest_port: 0,
            source_id,
            source_port,
            body: segment.encode(),
        }
    }

    fn tempdir_pair() -> (tempfile::TempDir, PathBuf, PathBuf) {
        let root = tempfile::tempdir().expect("tempdir");
        let a = content::ensure_content_dir(root.path(), 1).expect("dir");
        let b = content::ensure_content_dir(root.path(), 2).expect("dir");
        (root, a, b)
    }

    /// Run the three-way handshake between a fresh initiator/responder
    /// pair and return them in ACTIVE stage.
    fn established_pair(
        dnp_a: &mut Dnp,
        dnp_b: &mut Dnp,
        dir_a: PathBuf,
        dir_b: PathBuf,
        start: Instant,
    ) -> (Connection, Connection) {
        let mut initiator =
            Connection::initiate(dnp_a, &DirectRouter, 100, 2, 10, 5, dir_a, start)
                .expect("initiate");

        let requests = drain_segments(dnp_a);
        assert_eq!(requests[0].2.kind, SegmentKind::Request);

        let mut responder = Connection::accept_from(
            dnp_b,
            &DirectRouter,
            200,
            1,
            100,
            5,
            dir_b,
            start,
        )
        .expect("accept");
        let accepts = drain_segments(dnp_b);
        assert_eq!(accepts[0].2.kind, SegmentKind::Accept);

        initiator
            .serve(dnp_a, &DirectRouter, &delivery(2, 200, &accepts[0].2), start)
            .expect("serve accept");
        assert_eq!(initiator.stage(), Stage::Finalizing);
        assert_eq!(initiator.peer_port(), Some(200));

        let finalizes = drain_segments(dnp_a);
        assert_eq!(finalizes[0].2.kind, SegmentKind::Finalize);
        responder
            .serve(dnp_b, &DirectRouter, &delivery(1, 100, &finalizes[0].2), start)
            .expect("serve finalize");
        assert_eq!(responder.stage(), Stage::Active);

        // Quiescent confirmation: a full accept_max x timeout without
        // another ACCEPT promotes the initiator.
        let quiet = start + RTP_TIMEOUT * ACCEPT_MAX;
        initiator
            .cleanup(dnp_a, &DirectRouter, quiet)
            .expect("cleanup");
        assert_eq!(initiator.stage(), Stage::Active);
        drop(drain_segments(dnp_a));

        (initiator, responder)
    }

    #[test]
    fn test_three_way_handshake() {
        let mut dnp_a = dnp_for(1);
        let mut dnp_b = dnp_for(2);
        let (_root, dir_a, dir_b) = tempdir_pair();
        let start = Instant::now();

        let (initiator, responder) =
            established_pair(&mut dnp_a, &mut dnp_b, dir_a, dir_b, start);
        assert!(initiator.is_established());
        assert!(responder.is_established());
        assert_eq!(responder.window(), 5);
    }

    #[test]
    fn test_accept_resets_quiescence_window() {
        let mut dnp_a = dnp_for(1);
        let (_root, dir_a, _) = tempdir_pair();
        let start = Instant::now();

        let mut initiator =
            Connection::initiate(&mut dnp_a, &DirectRouter, 100, 2, 10, 5, dir_a, start)
                .expect("initiate");
        let accept = Segment::control(SegmentKind::Accept);
        initiator
            .serve(&mut dnp_a, &DirectRouter, &delivery(2, 200, &accept), start)
            .expect("serve");

        // A late duplicate ACCEPT pushes the promotion point out.
        let late = start + tick(2000);
        initiator
            .serve(&mut dnp_a, &DirectRouter, &delivery(2, 200, &accept), late)
            .expect("serve");
        initiator
            .cleanup(&mut dnp_a, &DirectRouter, start + RTP_TIMEOUT * ACCEPT_MAX)
            .expect("cleanup");
        assert_eq!(initiator.stage(), Stage::Finalizing);

        initiator
            .cleanup(&mut dnp_a, &DirectRouter, late + RTP_TIMEOUT * ACCEPT_MAX)
            .expect("cleanup");
        assert_eq!(initiator.stage(), Stage::Active);
    }

    #[test]
    fn test_request_retry_limit() {
        let mut dnp_a = dnp_for(1);
        let (_root, dir_a, _) = tempdir_pair();
        let start = Instant::now();

        let mut initiator =
            Connection::initiate(&mut dnp_a, &DirectRouter, 100, 2, 10, 5, dir_a, start)
                .expect("initiate");

        // Creation sent #1; five more ticks reach the budget of 6.
        for round in 1..REQUEST_MAX {
            initiator
                .cleanup(&mut dnp_a, &DirectRouter, start + RTP_TIMEOUT * round)
                .expect("still retrying");
        }
        let result =
            initiator.cleanup(&mut dnp_a, &DirectRouter, start + RTP_TIMEOUT * REQUEST_MAX);
        assert!(matches!(result, Err(Error::HandshakeExhausted)));

        let requests = drain_segments(&mut dnp_a);
        assert_eq!(requests.len(), REQUEST_MAX as usize);
        assert!(requests.iter().all(|(_, _, s)| s.kind == SegmentKind::Request));
    }

    #[test]
    fn test_reliable_transfer_with_loss() {
        let mut dnp_a = dnp_for(1);
        let mut dnp_b = dnp_for(2);
        let (_root, dir_a, dir_b) = tempdir_pair();
        let start = Instant::now();

        let (mut sender, mut receiver) =
            established_pair(&mut dnp_a, &mut dnp_b, dir_a, dir_b, start);

        let payload: Vec<u8> = (0..=255u8).cycle().take(2300).collect();
        sender.send(&payload, start).expect("queue transfer");
        assert_eq!(sender.queued_segments(), 5);

        let mut rng = fastrand::Rng::with_seed(0xBEEF);
        let mut now = start + RTP_TIMEOUT * ACCEPT_MAX;
        for _ in 0..40 {
            now += RTP_TIMEOUT + tick(10);
            sender.cleanup(&mut dnp_a, &DirectRouter, now).expect("sender tick");
            for (_, sport, segment) in drain_segments(&mut dnp_a) {
                if rng.u8(1..=100) <= 30 {
                    continue; // lost on the wire
                }
                receiver
                    .serve(&mut dnp_b, &DirectRouter, &delivery(1, sport, &segment), now)
                    .expect("receiver serve");
            }
            receiver.cleanup(&mut dnp_b, &DirectRouter, now).expect("receiver tick");
            for (_, sport, segment) in drain_segments(&mut dnp_b) {
                if rng.u8(1..=100) <= 30 {
                    continue;
                }
                sender
                    .serve(&mut dnp_a, &DirectRouter, &delivery(2, sport, &segment), now)
                    .expect("sender serve");
            }
            if sender.is_done() && receiver.complete_payload().is_some() {
                break;
            }
        }

        assert!(sender.is_done(), "sender never drained its queue");
        assert_eq!(receiver.complete_payload().expect("complete"), payload);
    }

    #[test]
    fn test_duplicate_content_is_idempotent() {
        let mut dnp_b = dnp_for(2);
        let (_root, _, dir_b) = tempdir_pair();
        let start = Instant::now();

        let mut receiver = Connection::accept_from(
            &mut dnp_b,
            &DirectRouter,
            200,
            1,
            100,
            5,
            dir_b,
            start,
        )
        .expect("accept");

        let chunk = Segment::new(SegmentKind::Content, 1, 8, b"once".to_vec());
        for _ in 0..3 {
            receiver
                .serve(&mut dnp_b, &DirectRouter, &delivery(1, 100, &chunk), start)
                .expect("serve");
        }
        let tail = Segment::new(SegmentKind::Content, 2, 8, b"only".to_vec());
        receiver
            .serve(&mut dnp_b, &DirectRouter, &delivery(1, 100, &tail), start)
            .expect("serve");

        assert_eq!(receiver.complete_payload().expect("complete"), b"onceonly");
    }

    #[test]
    fn test_out_of_order_content_sorted_by_seq() {
        let mut dnp_b = dnp_for(2);
        let (_root, _, dir_b) = tempdir_pair();
        let start = Instant::now();

        let mut receiver = Connection::accept_from(
            &mut dnp_b,
            &DirectRouter,
            200,
            1,
            100,
            5,
            dir_b,
            start,
        )
        .expect("accept");

        for (seq, body) in [(3u32, "c"), (1, "a"), (2, "b")] {
            let segment = Segment::new(SegmentKind::Content, seq, 3, body.into());
            receiver
                .serve(&mut dnp_b, &DirectRouter, &delivery(1, 100, &segment), start)
                .expect("serve");
        }
        assert_eq!(receiver.complete_payload().expect("complete"), b"abc");
    }

    #[test]
    fn test_busy_connection_rejects_second_send() {
        let mut dnp_a = dnp_for(1);
        let (_root, dir_a, _) = tempdir_pair();
        let start = Instant::now();

        let mut connection =
            Connection::initiate(&mut dnp_a, &DirectRouter, 100, 2, 10, 5, dir_a, start)
                .expect("initiate");
        connection.send(b"first", start).expect("first transfer");
        assert!(matches!(
            connection.send(b"second", start),
            Err(Error::ConnectionBusy)
        ));
    }

    #[test]
    fn test_broken_after_ak_silence() {
        let mut dnp_a = dnp_for(1);
        let mut dnp_b = dnp_for(2);
        let (_root, dir_a, dir_b) = tempdir_pair();
        let start = Instant::now();

        let (mut sender, mut receiver) =
            established_pair(&mut dnp_a, &mut dnp_b, dir_a, dir_b, start);

        sender.send(&[9u8; 1200], start).expect("queue");
        let mut now = start + RTP_TIMEOUT * ACCEPT_MAX;

        // One AK arrives, then the peer goes silent.
        now += RTP_TIMEOUT + tick(10);
        sender.cleanup(&mut dnp_a, &DirectRouter, now).expect("tick");
        let (_, sport, first) = drain_segments(&mut dnp_a).remove(0);
        receiver
            .serve(&mut dnp_b, &DirectRouter, &delivery(1, sport, &first), now)
            .expect("serve");
        receiver.cleanup(&mut dnp_b, &DirectRouter, now + tick(1)).expect("tick");
        let (_, rsport, ak) = drain_segments(&mut dnp_b)
            .into_iter()
            .find(|(_, _, s)| s.kind == SegmentKind::Ak)
            .expect("ak sent");
        sender
            .serve(&mut dnp_a, &DirectRouter, &delivery(2, rsport, &ak), now)
            .expect("serve ak");

        // Retries continue below the broken threshold...
        let result = sender.cleanup(
            &mut dnp_a,
            &DirectRouter,
            now + RTP_TIMEOUT * (BROKEN_TICKS - 2),
        );
        assert!(result.is_ok());

        // ...and the connection breaks past it.
        let result = sender.cleanup(
            &mut dnp_a,
            &DirectRouter,
            now + RTP_TIMEOUT * (BROKEN_TICKS + 2),
        );
        assert!(matches!(result, Err(Error::ConnectionBroken)));
    }

    #[test]
    fn test_stage_never_decreases() {
        let mut dnp_b = dnp_for(2);
        let (_root, _, dir_b) = tempdir_pair();
        let start = Instant::now();

        let mut responder = Connection::accept_from(
            &mut dnp_b,
            &DirectRouter,
            200,
            1,
            100,
            5,
            dir_b,
            start,
        )
        .expect("accept");

        responder
            .serve(
                &mut dnp_b,
                &DirectRouter,
                &delivery(1, 100, &Segment::control(SegmentKind::Finalize)),
                start,
            )
            .expect("serve");
        assert_eq!(responder.stage(), Stage::Active);

        // A straggling duplicate REQUEST must not regress the stage.
        let request = Segment::new(SegmentKind::Request, 0, 0, b"5".to_vec());
        responder
            .serve(&mut dnp_b, &DirectRouter, &delivery(1, 100, &request), start)
            .expect("serve");
        assert_eq!(responder.stage(), Stage::Active);
    }

    #[test]
    fn test_file_request_answered_with_content() {
        let mut dnp_a = dnp_for(1);
        let mut dnp_b = dnp_for(2);
        let (root, dir_a, dir_b) = tempdir_pair();
        let start = Instant::now();

        std::fs::write(dir_b.join("hello.txt"), b"file body here").expect("write");

        let (mut downloader, mut server) =
            established_pair(&mut dnp_a, &mut dnp_b, dir_a.clone(), dir_b, start);

        let mut now = start + RTP_TIMEOUT * ACCEPT_MAX;
        downloader.file_request(&mut dnp_a, &DirectRouter, "hello.txt", now);

        for _ in 0..10 {
            now += RTP_TIMEOUT + tick(10);
            for (_, sport, segment) in drain_segments(&mut dnp_a) {
                server
                    .serve(&mut dnp_b, &DirectRouter, &delivery(1, sport, &segment), now)
                    .expect("server serve");
            }
            server.cleanup(&mut dnp_b, &DirectRouter, now).expect("server tick");
            for (_, sport, segment) in drain_segments(&mut dnp_b) {
                downloader
                    .serve(&mut dnp_a, &DirectRouter, &delivery(2, sport, &segment), now)
                    .expect("downloader serve");
            }
            downloader
                .cleanup(&mut dnp_a, &DirectRouter, now)
                .expect("downloader tick");
            if downloader.is_done() {
                break;
            }
        }

        let saved = std::fs::read(dir_a.join("hello.txt")).expect("downloaded file");
        assert_eq!(saved, b"file body here");
        drop(root);
    }

    #[test]
    fn test_missing_file_answered_with_dne() {
        let mut dnp_b = dnp_for(2);
        let (_root, _, dir_b) = tempdir_pair();
        let start = Instant::now();

        let mut server = Connection::accept_from(
            &mut dnp_b,
            &DirectRouter,
            200,
            1,
            100,
            5,
            dir_b,
            start,
        )
        .expect("accept");
        drop(drain_segments(&mut dnp_b));

        let ask = Segment::new(SegmentKind::FileRequest, 0, 0, b"nope.txt".to_vec());
        server
            .serve(&mut dnp_b, &DirectRouter, &delivery(1, 100, &ask), start)
            .expect("serve");

        let replies = drain_segments(&mut dnp_b);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].2.kind, SegmentKind::FileResponse);
        assert_eq!(replies[0].2.body, b"DNE");
    }
}
