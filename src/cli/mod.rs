//! Command-line interface for r128tag.
//!
//! This module provides commands for measuring loudness, writing gain tags,
//! and inspecting the Opus header gain.

mod commands;

pub use commands::{Cli, Commands, LogLevel, run_command};
