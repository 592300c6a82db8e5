mod appliance;
mod connection;
mod error;
mod grid;
mod house;
mod profile;
mod signal;
mod simulator;
mod statistics;
mod telemetry;
mod utils;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, NaiveTime};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::info;

use statistics::StatisticsBundle;

/// Discrete-time simulator of a residential smart grid: minute-resolution
/// demand curves under smart, uncontrolled and spread-out appliance control,
/// driven by a dynamic electricity price signal.
#[derive(Debug, Parser)]
#[command(name = "gridsim", version)]
struct Cli {
    /// First simulated day (YYYY-MM-DD)
    starting_date: NaiveDate,

    /// Number of days to simulate
    simulation_length: u32,

    /// Number of households connected to the grid
    house_count: u32,

    /// Folder for desc.txt and data.csv
    output_folder: PathBuf,

    /// Folder holding the statistics datasets
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Seed the random stream for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
}

fn main() {
    telemetry::init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            std::process::exit(1);
        }
    };

    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let stats = Arc::new(StatisticsBundle::load(&cli.data_dir)?);
    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let start = cli.starting_date.and_time(NaiveTime::MIN);
    let output = simulator::run(
        start,
        cli.simulation_length,
        cli.house_count,
        Arc::clone(&stats),
        &mut rng,
    )?;
    simulator::write_outputs(&cli.output_folder, &output, &stats.price)?;

    info!(folder = %cli.output_folder.display(), "simulation results written");
    Ok(())
}
