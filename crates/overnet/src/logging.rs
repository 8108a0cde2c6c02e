// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Logging backend for the `log` facade.
//!
//! The library logs through `log::debug!/info!/warn!/error!`; this module
//! supplies the backend the node binary installs at startup: either a
//! console writer (stderr) or an append-mode file writer. Exactly one
//! backend can be installed per process (`log::set_boxed_logger`).

use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;

/// Where log lines are written.
enum Output {
    /// stderr, unbuffered.
    Console,
    /// Append-mode file behind a mutex.
    File(Mutex<std::fs::File>),
}

/// Backend installed behind the `log` facade.
struct Logger {
    output: Output,
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format!("[{}] {}\n", level_tag(record.level()), record.args());
        match &self.output {
            Output::Console => eprint!("{}", line),
            Output::File(file) => {
                if let Ok(mut file) = file.lock() {
                    let _ = file.write_all(line.as_bytes());
                }
            }
        }
    }

    fn flush(&self) {
        match &self.output {
            Output::Console => {
                let _ = io::stderr().flush();
            }
            Output::File(file) => {
                if let Ok(mut file) = file.lock() {
                    let _ = file.flush();
                }
            }
        }
    }
}

/// Fixed-width level tag, matching the node's historical log format.
fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "WARN ",
        Level::Info => "INFO ",
        Level::Debug => "DEBUG",
        Level::Trace => "TRACE",
    }
}

/// Install the console backend at the given level.
///
/// A second call is ignored (the facade accepts one logger per process),
/// which keeps test binaries that init repeatedly safe.
pub fn init_console(level: LevelFilter) {
    install(Logger { output: Output::Console }, level);
}

/// Install a file backend appending to `path` at the given level.
///
/// # Errors
/// Returns the underlying error if the file cannot be opened.
pub fn init_file(path: &Path, level: LevelFilter) -> io::Result<()> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    install(
        Logger {
            output: Output::File(Mutex::new(file)),
        },
        level,
    );
    Ok(())
}

/// Parse a level name the way the node CLI spells them.
///
/// Accepts ERROR/WARNING/INFO/DEBUG in any case; `None` for anything else.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    match name.to_ascii_uppercase().as_str() {
        "ERROR" => Some(LevelFilter::Error),
        "WARN" | "WARNING" => Some(LevelFilter::Warn),
        "INFO" => Some(LevelFilter::Info),
        "DEBUG" => Some(LevelFilter::Debug),
        _ => None,
    }
}

fn install(logger: Logger, level: LevelFilter) {
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_names() {
        assert_eq!(parse_level("WARNING"), Some(LevelFilter::Warn));
        assert_eq!(parse_level("debug"), Some(LevelFilter::Debug));
        assert_eq!(parse_level("INFO"), Some(LevelFilter::Info));
        assert_eq!(parse_level("noise"), None);
    }

    #[test]
    fn test_level_tags_fixed_width() {
        assert_eq!(level_tag(Level::Warn).len(), 5);
        assert_eq!(level_tag(Level::Info).len(), 5);
        assert_eq!(level_tag(Level::Error).len(), 5);
    }

    #[test]
    fn test_console_init_is_idempotent() {
        init_console(LevelFilter::Warn);
        init_console(LevelFilter::Debug);
        log::warn!("logger installed");
    }
}
