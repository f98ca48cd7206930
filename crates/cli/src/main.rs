mod cli;
mod pool;
mod simulate;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use cadence_core::config::{load_dotenv, CadenceConfig};

use crate::cli::{CliArgs, Command};

fn main() -> Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();

    let config = match &args.config {
        Some(path) => CadenceConfig::from_file(path)
            .with_context(|| format!("failed to load config: {}", path.display()))?,
        None => CadenceConfig::from_env().context("invalid CADENCE_* environment")?,
    };
    config.log_summary();

    match &args.command {
        Command::Simulate(sim) => {
            info!(delay_ms = sim.delay_ms, every_ms = sim.every_ms, until_ms = sim.until_ms, "simulating");
            let report = simulate::run(sim, &config.virtual_time)?;
            simulate::print(&report, sim.json)?;
        }
        Command::Pool(pool_args) => {
            info!(actions = pool_args.actions, "running worker pool demo");
            let report = pool::run(pool_args, &config.worker_pool)?;
            pool::print(&report, pool_args.json)?;
        }
    }

    Ok(())
}
