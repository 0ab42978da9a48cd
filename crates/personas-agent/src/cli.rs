//! CLI argument definitions using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Canvas Personas agent
///
/// Watches a canvas and answers questions with a panel of simulated personas.
#[derive(Parser, Debug)]
#[command(name = "personas-agent")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (default: ~/.canvas-personas/config.toml)
    #[arg(long, global = true, env = "PERSONAS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch the canvas and run workflows until interrupted
    Run,

    /// Validate configuration and ping the canvas and generation backends
    Check,

    /// Show version
    Version,
}
