//! Quiver CLI binary.

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use quiver::cli::args::QuiverArgs;
use quiver::cli::commands::execute_command;

fn log_filter(verbosity: u8) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_env("QUIVER_LOG") {
        return filter;
    }
    let level = match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        _ => "debug",
    };
    EnvFilter::new(level)
}

fn main() {
    let args = QuiverArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(args.verbosity()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = execute_command(args) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
