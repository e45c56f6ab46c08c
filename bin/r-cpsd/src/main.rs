//! ---
//! cps_section: "01-platform-foundation"
//! cps_subsection: "binary"
//! cps_type: "source"
//! cps_scope: "code"
//! cps_description: "Binary entrypoint for the R-CPS scenario driver."
//! cps_version: "v0.1.0"
//! cps_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, Subcommand};
use r_cps_common::config::AppConfig;
use r_cps_common::logging::init_tracing;
use r_cps_scenarios::{avc, frequency, protection, reconfig};
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "R-CPS co-simulation driver",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Pace virtual time against the wall clock")]
    real_time: bool,

    #[arg(long, value_name = "MS", help = "Override the scenario duration in milliseconds")]
    duration_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Automatic voltage control scenario")]
    Avc,
    #[command(about = "Virtual-power-plant primary frequency response scenario")]
    Vpp,
    #[command(about = "Relay protection scenario")]
    Protection,
    #[command(about = "Logic protection and network reconfiguration scenario")]
    Reconfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/r-cps.toml"));
    candidates.push(PathBuf::from("configs/r-cps.dev.toml"));

    let mut config = AppConfig::load(&candidates)?;
    if cli.real_time {
        config.simulation.real_time = true;
    }
    if let Some(duration_ms) = cli.duration_ms {
        config.simulation.duration = Duration::from_millis(duration_ms);
    }

    init_tracing("r-cpsd", &config.logging)?;
    info!(
        duration_ms = config.simulation.duration.as_millis() as u64,
        real_time = config.simulation.real_time,
        seed = config.simulation.random_seed,
        "configuration loaded"
    );

    let started = Instant::now();
    match cli.command {
        Commands::Avc => avc::run_scenario(&config.simulation)?,
        Commands::Vpp => frequency::run_scenario(&config.simulation)?,
        Commands::Protection => protection::run_scenario(&config.simulation)?,
        Commands::Reconfig => reconfig::run_scenario(&config.simulation)?,
    }
    info!(
        wall_elapsed_ms = started.elapsed().as_millis() as u64,
        "scenario driver finished"
    );
    Ok(())
}
