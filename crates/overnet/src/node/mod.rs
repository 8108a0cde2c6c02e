// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The interactive node: one mio event loop over the UDP socket and
//! stdin.
//!
//! Single-threaded and cooperative: the poll (10 ms timeout) is the
//! only blocking point. Each iteration reads every queued datagram,
//! applies any complete command lines, drains the stack's send queue
//! through the garbled channel, and runs the cleanup pass once per
//! [`CLEANUP_INTERVAL`].

mod command;

use crate::channel::Channel;
use crate::config::{BURN_IN, CLEANUP_INTERVAL, POLL_TIMEOUT, RECV_BUFFER_LEN};
use crate::stack::Stack;
use crate::topology::{LinkTable, Topology};
use crate::{NodeId, Result};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::path::Path;
use std::rc::Rc;
use std::time::Instant;

const SOCKET: Token = Token(0);
const STDIN: Token = Token(1);

/// A running overlay node.
pub struct Node {
    stack: Stack,
    channel: Channel,
    poll: Poll,
    events: Events,
    stdin: StdinLines,
    recv_buf: Vec<u8>,
    quit: bool,
}

impl Node {
    /// Build a node from the topology file and bind its socket.
    pub fn new(
        node_id: NodeId,
        topology_file: &Path,
        loss: u8,
        corruption: u8,
    ) -> Result<Self> {
        log::warn!("[NODE] starting node: {}", node_id);

        let topology = Topology::load(topology_file)?;
        let links = Rc::new(LinkTable::from_topology(&topology, node_id)?);

        let mut channel = Channel::bind(links.local_addr(), loss, corruption)?;
        let poll = Poll::new()?;
        channel.register(poll.registry(), SOCKET)?;

        let stdin = StdinLines::new()?;
        poll.registry()
            .register(&mut SourceFd(&libc::STDIN_FILENO), STDIN, Interest::READABLE)?;

        Ok(Self {
            stack: Stack::new(links, Instant::now()),
            channel,
            poll,
            events: Events::with_capacity(64),
            stdin,
            recv_buf: vec![0u8; RECV_BUFFER_LEN],
            quit: false,
        })
    }

    /// Run until the user quits. Blocking.
    pub fn run(&mut self) -> Result<()> {
        self.burn_in()?;
        command::show_menu(self.stack.node_id());

        let mut last_cleanup = Instant::now();
        while !self.quit {
            match self.poll.poll(&mut self.events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }

            let mut socket_ready = false;
            let mut stdin_ready = false;
            for event in self.events.iter() {
                match event.token() {
                    SOCKET => socket_ready = true,
                    STDIN => stdin_ready = true,
                    _ => {}
                }
            }

            if socket_ready {
                self.drain_socket();
            }
            if stdin_ready {
                let lines = self.stdin.read_lines();
                for line in lines {
                    self.handle_command(&line);
                }
                if self.stdin.at_eof() {
                    // Input closed underneath us; treat as quit.
                    self.quit = true;
                }
            }

            for item in self.stack.drain_send_list() {
                self.channel.send_garbled(&item.datagram, item.addr);
            }

            let now = Instant::now();
            if now.duration_since(last_cleanup) > CLEANUP_INTERVAL {
                last_cleanup = now;
                self.stack.cleanup(now);
            }
        }
        Ok(())
    }

    /// Discard whatever the channel queued before this node was ready.
    fn burn_in(&mut self) -> Result<()> {
        let start = Instant::now();
        while start.elapsed() < BURN_IN {
            match self.poll.poll(&mut self.events, Some(POLL_TIMEOUT)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
            while let Ok((_, _)) = self.channel.recv(&mut self.recv_buf) {}
        }
        Ok(())
    }

    /// Read every queued datagram into the stack.
    fn drain_socket(&mut self) {
        loop {
            match self.channel.recv(&mut self.recv_buf) {
                Ok((len, _)) => {
                    let now = Instant::now();
                    self.stack.handle_datagram(&self.recv_buf[..len], now);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    log::warn!("[NODE] socket receive failed: {}", err);
                    break;
                }
            }
        }
    }
}

/// Non-blocking line reader over the process stdin.
struct StdinLines {
    buffer: Vec<u8>,
    eof: bool,
}

impl StdinLines {
    fn new() -> io::Result<Self> {
        // SAFETY: fcntl on the process stdin fd with standard flags.
        let flags = unsafe { libc::fcntl(libc::STDIN_FILENO, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: same fd, adding O_NONBLOCK to the flags just read.
        let result =
            unsafe { libc::fcntl(libc::STDIN_FILENO, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            buffer: Vec::new(),
            eof: false,
        })
    }

    /// Read whatever is available and return the complete lines.
    fn read_lines(&mut self) -> Vec<String> {
        let mut chunk = [0u8; 1024];
        loop {
            // SAFETY: read into a stack buffer of the stated length.
            let n = unsafe {
                libc::read(
                    libc::STDIN_FILENO,
                    chunk.as_mut_ptr().cast(),
                    chunk.len(),
                )
            };
            if n > 0 {
                self.buffer.extend_from_slice(&chunk[..n as usize]);
            } else {
                if n == 0 {
                    self.eof = true;
                }
                break;
            }
        }

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&byte| byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1])
                .trim()
                .to_string();
            lines.push(line);
        }
        lines
    }

    fn at_eof(&self) -> bool {
        self.eof
    }
}
