// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Garbled-channel measurement probe.
//!
//! Sends a batch of identical datagrams through a garbled [`Channel`]
//! to a plain localhost receiver and reports the measured loss and
//! corruption rates, so the simulator can be sanity-checked against
//! its configured thresholds.
//!
//! ```bash
//! overnet-garble-probe --loss 25 --corruption 25 --count 10000
//! ```

use clap::Parser;
use overnet::channel::Channel;
use std::net::UdpSocket;
use std::process::ExitCode;
use std::time::Duration;

const TEST_MESSAGE: &[u8] = b"This is a test message";

/// Measures the garbler against its configured thresholds.
#[derive(Parser, Debug)]
#[command(name = "overnet-garble-probe")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Loss threshold under test (percent)
    #[arg(long, default_value = "25")]
    loss: u8,

    /// Corruption threshold under test (percent)
    #[arg(long, default_value = "25")]
    corruption: u8,

    /// Number of datagrams to send
    #[arg(long, default_value = "10000")]
    count: u32,
}

fn main() -> ExitCode {
    let args = Args::parse();

    println!("Testing garbler with parameters:");
    println!("Loss Threshold:            {}", args.loss);
    println!("Corruption Threshold:      {}", args.corruption);
    println!("Number of packets to send: {}", args.count);

    match probe(&args) {
        Ok((received, uncorrupted)) => {
            let loss_rate = 1.0 - f64::from(received) / f64::from(args.count);
            let corruption_rate = if received > 0 {
                1.0 - f64::from(uncorrupted) / f64::from(received)
            } else {
                0.0
            };
            println!();
            println!("Received:        {} of {}", received, args.count);
            println!("Loss rate:       {:.4}", loss_rate);
            println!("Corruption rate: {:.4}", corruption_rate);
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("Probe failed: {}", err);
            ExitCode::FAILURE
        }
    }
}

/// Returns `(received_total, received_uncorrupted)`.
fn probe(args: &Args) -> overnet::Result<(u32, u32)> {
    let loopback = "127.0.0.1:0"
        .parse()
        .map_err(|_| overnet::Error::InvalidArgument("loopback address".into()))?;
    let mut sender = Channel::bind(loopback, args.loss, args.corruption)?;
    let receiver = UdpSocket::bind("127.0.0.1:0")?;
    receiver.set_read_timeout(Some(Duration::from_millis(100)))?;
    let dest = receiver.local_addr()?;

    let mut received = 0u32;
    let mut uncorrupted = 0u32;
    let mut buf = [0u8; 256];

    for _ in 0..args.count {
        sender.send_garbled(TEST_MESSAGE, dest);

        match receiver.recv_from(&mut buf) {
            Ok((len, _)) => {
                received += 1;
                if &buf[..len] == TEST_MESSAGE {
                    uncorrupted += 1;
                }
            }
            // Timeout: the datagram was lost.
            Err(err)
                if err.kind() == std::io::ErrorKind::WouldBlock
                    || err.kind() == std::io::ErrorKind::TimedOut => {}
            Err(err) => return Err(err.into()),
        }
    }

    Ok((received, uncorrupted))
}
