//! personas-agent - Canvas Personas agent
//!
//! Streams canvas events, detects question notes, and answers them with a
//! panel of simulated personas.

use anyhow::Result;
use clap::Parser;
use std::backtrace::Backtrace;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod commands;
mod config;
mod error;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json, cli.debug)?;
    install_panic_hook();

    match cli.command {
        Commands::Run => {
            let config = config::load(cli.config.as_deref())?;
            commands::run::execute(config).await
        }
        Commands::Check => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(config::default_config_path);
            let config = config::load(cli.config.as_deref())?;
            commands::check::execute(&config, &path).await
        }
        Commands::Version => {
            println!("personas-agent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing(json: bool, debug: bool) -> Result<()> {
    let level = if debug { "debug" } else { "info" };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(format!("personas_agent={level},personas_core={level}")),
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }
    Ok(())
}

/// Route panics through tracing with a backtrace.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let backtrace = Backtrace::capture();
        tracing::error!(panic = %info, %backtrace, "Panic");
    }));
}
