// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interactive command console.
//!
//! One command per input line, first token is the verb. Argument
//! mistakes print a short hint and the loop continues; nothing here is
//! fatal.

use super::Node;
use crate::channel::GarbleParam;
use crate::{Error, NodeId};
use std::time::Instant;

impl Node {
    /// Apply one user input line.
    pub(super) fn handle_command(&mut self, line: &str) {
        if line.is_empty() {
            return;
        }

        let (command, contents) = match line.split_once(' ') {
            Some((command, contents)) => (command, Some(contents.trim())),
            None => (line, None),
        };

        println!();
        match command {
            "quit" => {
                println!("Quiting program");
                self.quit = true;
            }
            "menu" => show_menu(self.stack.node_id()),
            "setGarble" => self.cmd_set_garble(contents),
            "downLink" => self.cmd_down_link(contents),
            "upLink" => self.cmd_up_link(contents),
            "message" => self.cmd_message(contents),
            "routing" => {
                println!("Current routing table:");
                println!("{}", self.stack.routing_table());
            }
            "startService" => self.cmd_start_service(contents),
            "connectTo" => self.cmd_connect_to(contents),
            "download" => self.cmd_download(contents),
            "services" => {
                println!("Service points:");
                for id in self.stack.service_ids() {
                    println!("{}", id);
                }
            }
            "connections" => self.cmd_connections(contents),
            "links" => {
                for link in self.stack.link_status() {
                    println!(
                        "Link to: {} IP: {} Port: {} MTU: {} Active: {}",
                        link.neighbor_id,
                        link.addr.ip(),
                        link.addr.port(),
                        link.mtu,
                        link.up
                    );
                }
            }
            other => {
                println!("Command not known: {}", other);
                println!("Remember: 'menu' will show the list of commands");
            }
        }
        println!();
    }

    fn cmd_set_garble(&mut self, contents: Option<&str>) {
        let Some(contents) = contents else {
            println!("Need loss, corruption");
            return;
        };
        let fields: Vec<&str> = contents.split_whitespace().collect();
        if fields.len() < 2 {
            println!("Need loss, corruption");
            return;
        }

        let parsed = GarbleParam::parse(fields[0])
            .and_then(|loss| GarbleParam::parse(fields[1]).map(|corruption| (loss, corruption)));
        match parsed.and_then(|(loss, corruption)| self.channel.set_garble(loss, corruption)) {
            Ok(()) => {}
            Err(_) => println!("Values not valid"),
        }
    }

    fn cmd_down_link(&mut self, contents: Option<&str>) {
        let Some(neighbor) = parse_id(contents) else {
            println!("Need neighbor id");
            return;
        };
        match self.stack.down_link(neighbor) {
            Ok(()) => {}
            Err(Error::NotLinked(_)) => println!("Not a neighbor"),
            Err(_) => println!("Link is already down"),
        }
    }

    fn cmd_up_link(&mut self, contents: Option<&str>) {
        let Some(neighbor) = parse_id(contents) else {
            println!("Need neighbor id");
            return;
        };
        match self.stack.up_link(neighbor) {
            Ok(()) => {}
            Err(Error::NotLinked(_)) => println!("Not a neighbor"),
            Err(_) => println!("Link not down"),
        }
    }

    fn cmd_message(&mut self, contents: Option<&str>) {
        let Some((target, text)) = contents.and_then(|rest| rest.split_once(' ')) else {
            println!("Need node id, message");
            return;
        };
        let Ok(target) = target.parse::<NodeId>() else {
            println!("Need node id, message");
            return;
        };
        self.stack.send_message(target, text);
    }

    fn cmd_start_service(&mut self, contents: Option<&str>) {
        let Some(max_connections) = contents.and_then(|text| text.parse().ok()) else {
            println!("Need max connections");
            return;
        };
        match self.stack.start_service(max_connections) {
            Ok(service_id) => println!("Service created: {}", service_id),
            Err(err) => println!("Could not create service: {}", err),
        }
    }

    fn cmd_connect_to(&mut self, contents: Option<&str>) {
        let fields: Vec<&str> = contents.unwrap_or("").split_whitespace().collect();
        if fields.len() < 3 {
            println!("Need target_id, target_port, window");
            return;
        }
        let parsed = (
            fields[0].parse::<NodeId>(),
            fields[1].parse::<u32>(),
            fields[2].parse::<u32>(),
        );
        let (Ok(target), Ok(listen), Ok(window)) = parsed else {
            println!("Incorrect input");
            return;
        };

        match self.stack.connect_to(target, listen, window, Instant::now()) {
            Ok(connection_id) => println!("Connection id: {}", connection_id),
            Err(Error::Unreachable(_)) => {
                println!("Connection failed, destination is not reachable");
            }
            Err(_) => println!("Connection failed"),
        }
    }

    fn cmd_download(&mut self, contents: Option<&str>) {
        let fields: Vec<&str> = contents.unwrap_or("").split_whitespace().collect();
        if fields.len() < 2 {
            println!("Need connectionID, file name");
            return;
        }
        let Ok(connection_id) = fields[0].parse::<u32>() else {
            println!("Need connectionID, file name");
            return;
        };

        match self.stack.download(connection_id, fields[1], Instant::now()) {
            Ok(()) => {}
            Err(Error::InvalidArgument(msg)) => println!("{}", msg),
            Err(err) => println!("{}", err),
        }
    }

    fn cmd_connections(&mut self, contents: Option<&str>) {
        let Some(service_id) = contents.and_then(|text| text.parse().ok()) else {
            println!("Need service id");
            return;
        };
        match self.stack.connection_string(service_id) {
            Ok(listing) => println!("{}", listing),
            Err(_) => println!("No service id with that number"),
        }
    }
}

fn parse_id(contents: Option<&str>) -> Option<NodeId> {
    contents.and_then(|text| text.parse().ok())
}

/// Print the command menu.
pub(super) fn show_menu(node_id: NodeId) {
    println!();
    println!("{}", "-".repeat(75));
    println!("Node: {}", node_id);
    println!("User commands: ");
    println!("'quit' to quit");
    println!("'menu' to show this menu again");
    println!("'setGarble' [loss] [corruption] sets the garbler");
    println!("'downLink' [neighbor id] deactivate this link");
    println!("'upLink' [neighbor id] reactivate this link");
    println!("'message' [node id to send to] [what to send] to send a message to another node");
    println!("'routing' to show the current routing table");
    println!("'services' to show active service points");
    println!("'links' to show link status");
    println!("'connections' [service id] show open connections on service");
    println!("'startService' [max_connections] to start a download service");
    println!("'connectTo' [target id] [target service] [window] connect to target node at service");
    println!("'download' [connection id] [file name] gets the file though the connection");
    println!("{}", "-".repeat(75));
    println!();
}
