//! Interlock command-loop binary.
//!
//! Reads commands from stdin, writes replies to stdout. Diagnostics go
//! to stderr via `tracing` so the protocol stream stays clean; set
//! `INTERLOCK_LOG=debug` to see why a command answered `-1`.

use interlock_common::EngineConfig;
use interlock_engine::{Dispatcher, Reply};
use std::io::{BufRead, BufWriter, Write};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("INTERLOCK_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let data_dir = std::env::args().nth(1).unwrap_or_else(|| "./bin".to_string());
    let config = EngineConfig::at(data_dir);
    let mut dispatcher = match Dispatcher::open(&config) {
        Ok(d) => d,
        Err(err) => {
            eprintln!("interlock: failed to open data files: {}", err);
            std::process::exit(1);
        }
    };

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                eprintln!("interlock: stdin read failed: {}", err);
                break;
            }
        };
        match dispatcher.handle(&line) {
            Some(Reply::Line(reply)) => {
                if writeln!(out, "{}", reply).is_err() {
                    break;
                }
            }
            Some(Reply::Exit(reply)) => {
                let _ = writeln!(out, "{}", reply);
                break;
            }
            None => {}
        }
    }
    let _ = out.flush();
}
