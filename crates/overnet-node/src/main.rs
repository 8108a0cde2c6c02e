// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Overnet node daemon.
//!
//! Runs one overlay node: reads the topology file, binds the node's
//! UDP socket, and serves the interactive command console until `quit`.
//!
//! # Usage
//!
//! ```bash
//! # Node 1 of topology.txt with a perfect channel
//! overnet-node 1 topology.txt
//!
//! # 5% loss, 5% corruption, logging to run_1.log at INFO
//! overnet-node 1 topology.txt -l 5 -c 5 -f run -v INFO
//! ```

use clap::Parser;
use log::LevelFilter;
use overnet::{logging, Node, NodeId};
use std::path::PathBuf;
use std::process::ExitCode;

/// Runs a node of the overlay network.
#[derive(Parser, Debug)]
#[command(name = "overnet-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// The ID number of the node to run
    node_id: NodeId,

    /// The network topology file (path and file name)
    topology_file: PathBuf,

    /// Initial loss parameter of the garbler (percent)
    #[arg(short = 'l', long = "loss", default_value = "5")]
    loss: u8,

    /// Initial corruption parameter of the garbler (percent)
    #[arg(short = 'c', long = "corruption", default_value = "5")]
    corruption: u8,

    /// Log file prefix; `<prefix>_<node_id>.log` is appended to.
    /// Without this, log lines go to the console.
    #[arg(short = 'f', long = "logger-file")]
    log_file: Option<String>,

    /// Logger level: ERROR, WARNING, INFO or DEBUG
    #[arg(short = 'v', long = "logger-level", default_value = "WARNING")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let Some(level) = logging::parse_level(&args.log_level) else {
        eprintln!("Logger level not known: {}", args.log_level);
        return ExitCode::FAILURE;
    };

    if let Err(err) = init_logging(&args, level) {
        eprintln!("Could not set up logging: {}", err);
        return ExitCode::FAILURE;
    }

    let mut node = match Node::new(args.node_id, &args.topology_file, args.loss, args.corruption) {
        Ok(node) => node,
        Err(err) => {
            eprintln!("Could not start node {}: {}", args.node_id, err);
            return ExitCode::FAILURE;
        }
    };

    match node.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Node stopped with error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(args: &Args, level: LevelFilter) -> std::io::Result<()> {
    match &args.log_file {
        Some(prefix) => {
            let path = PathBuf::from(format!("{}_{}.log", prefix, args.node_id));
            println!("Saving log file to: {}", path.display());
            logging::init_file(&path, level)
        }
        None => {
            logging::init_console(level);
            Ok(())
        }
    }
}
