//! Relay CLI - Replay relay for live broadcast production
//!
//! # Commands
//!
//! - `relay stream` - Re-emit replays into a spectate folder at live pace
//! - `relay inspect` - Print the structure of one replay
//! - `relay index` - Link replays in a directory to bracket sets by connect code
//! - `relay config` - Show the effective configuration, or write it out
//!
//! # Usage
//!
//! ```bash
//! # Stream a task manifest written by the console
//! relay stream --tasks spoof_tasks.json
//!
//! # Stream every replay recorded for one bracket set
//! relay stream --bracket bracket.json --set 7 --out spectate
//!
//! # Link replays to sets and merge the result into the bracket config
//! relay index replays/ --sets sets.json --merge-into bracket.json
//! ```
//!
//! Progress is written to stdout as `SPOOF_PROGRESS:<json>` lines. Logs go to
//! stderr; set `RUST_LOG` to change the level.

mod index;
mod inspect;
mod settings;
mod stream;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use relaycast_core::config;

/// Relay CLI - Replay relay for live broadcast production
#[derive(Parser)]
#[command(name = "relay")]
#[command(about = "Stream, inspect and index game replays")]
#[command(version)]
struct Cli {
    /// Config file (defaults to relay.toml in the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Re-emit replays into an output folder at live pace
    Stream(stream::StreamArgs),

    /// Print header, size table and frame range of a replay
    Inspect(inspect::InspectArgs),

    /// Build the connect-code pair index for a replay directory
    Index(index::IndexArgs),

    /// Print the effective configuration as TOML
    Config(settings::ConfigArgs),
}

fn main() -> Result<()> {
    // Logs on stderr; stdout carries the progress protocol
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let stored = match &cli.config {
        Some(path) => config::load_from(path),
        None => config::load(),
    };
    let mut config = stored.clone();
    config.apply_env_overrides();

    match cli.command {
        Commands::Stream(args) => stream::execute(args, &config),
        Commands::Inspect(args) => inspect::execute(args),
        Commands::Index(args) => index::execute(args, &config),
        Commands::Config(args) => settings::execute(args, cli.config.as_deref(), &stored, &config),
    }
}
