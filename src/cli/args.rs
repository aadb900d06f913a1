use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// GRID-BROKER: storage server discovery for an erasure-coded grid
///
/// Tracks the storage servers a client can use, connects to them and reports
/// when enough are reachable to place shares.
#[derive(Parser, Debug)]
#[command(name = "grid-broker")]
#[command(version = "0.1.0")]
#[command(about = "Discover and connect to grid storage servers")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the broker with the status API
    Run(RunArgs),

    /// Connect to the configured servers and report whether enough are up
    Check(CheckArgs),

    /// List configured servers without connecting
    List(ListArgs),

    /// Generate a sample config file
    Init(InitArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the broker config file (YAML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Override the status API port
    #[arg(short, long)]
    pub port: Option<u16>,
}

#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Path to the broker config file (YAML)
    #[arg(short, long)]
    pub config: PathBuf,

    /// Servers required (default: shares_happy from the config)
    #[arg(long)]
    pub threshold: Option<usize>,

    /// Seconds to wait for the threshold
    #[arg(long, default_value = "30")]
    pub timeout_secs: u64,
}

#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Path to the broker config file (YAML)
    #[arg(short, long)]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Output path for the config file
    #[arg(short, long, default_value = "grid-broker.yaml")]
    pub output: PathBuf,
}
