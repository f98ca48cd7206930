use std::path::PathBuf;

use clap::{Parser, Subcommand};

use cadence_core::QueueKind;

/// Drive cadence schedulers from the command line.
///
/// `simulate` replays a repeating schedule in virtual time; `pool` pushes
/// work through a suspended worker pool and reports the execution order.
#[derive(Parser, Debug)]
#[command(name = "cadence", about = "Run cadence scheduler simulations and demos")]
pub struct CliArgs {
    /// Path to a cadence.toml config file (defaults + CADENCE_* env if unset)
    #[arg(long, env = "CADENCE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fire a repeating action on a virtual clock and list every firing.
    Simulate(SimulateArgs),
    /// Schedule actions on a suspended worker pool, then resume it.
    Pool(PoolArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Delay before the first firing, in virtual milliseconds
    #[arg(long, default_value = "0")]
    pub delay_ms: u64,

    /// Interval between firings, in virtual milliseconds
    #[arg(long, default_value = "1000")]
    pub every_ms: u64,

    /// Virtual time to advance to before stopping, in milliseconds
    #[arg(long, default_value = "10000")]
    pub until_ms: u64,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct PoolArgs {
    /// Number of actions to schedule
    #[arg(long, default_value = "8")]
    pub actions: usize,

    /// Queue kind override: serial or concurrent
    #[arg(long)]
    pub kind: Option<QueueKind>,

    /// How long to hold the pool suspended before resuming, in milliseconds
    #[arg(long, default_value = "100")]
    pub suspend_ms: u64,

    /// Give up waiting for the actions after this many milliseconds
    #[arg(long, default_value = "10000")]
    pub timeout_ms: u64,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}
