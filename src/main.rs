//! r128tag - measure loudness and write ReplayGain 2.0 / R128 gain tags.
//!
//! Loudness is measured with ffmpeg's EBU R128 filter. Gains are written in
//! each container's own convention; Opus files can additionally have their
//! track gain moved into the OpusHead output gain field.

pub mod album;
pub mod cli;
pub mod config;
pub mod error;
pub mod gain;
pub mod loudness;
pub mod metadata;
pub mod opus;
pub mod scanner;
#[cfg(test)]
pub mod test_utils;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<ExitCode> {
    let args = cli::Cli::parse();

    // Initialize logging; RUST_LOG wins over -v
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("r128tag={}", args.verbosity.directive())));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = config::load();
    cli::run_command(&args, &config)
}
