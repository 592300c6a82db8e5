//! # Simulation driver
//!
//! Wires the grid and the houses together, advances the clock one day at a
//! time and turns the resulting profiles into the output files. The driver
//! only provides the clock signal; the grid and houses do all the work on
//! their own tick.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime};
use indicatif::ProgressBar;
use rand::rngs::StdRng;
use tracing::info;

use crate::grid::Grid;
use crate::house::House;
use crate::profile::Profile;
use crate::statistics::{PriceConfig, StatisticsBundle};
use crate::utils::{one_day, MINUTES_PER_DAY};

/// Everything a finished simulation produced, one value per minute.
#[derive(Debug)]
pub struct SimulationOutput {
    pub start: NaiveDateTime,
    pub days: u32,
    pub house_count: u32,
    pub predicted_base_demand: Vec<f64>,
    pub actual_base_demand: Vec<f64>,
    pub target_demand: Vec<f64>,
    pub smart_demand: Vec<f64>,
    pub uncontrolled_demand: Vec<f64>,
    pub spread_out_demand: Vec<f64>,
    pub price_ratio: Vec<f64>,
}

/// Runs the whole simulation: build the population, set up the grid, then
/// tick day by day.
pub fn run(
    start: NaiveDateTime,
    days: u32,
    house_count: u32,
    stats: Arc<StatisticsBundle>,
    rng: &mut StdRng,
) -> Result<SimulationOutput> {
    let preparation = Instant::now();

    info!(houses = house_count, "creating grid and households");
    let mut grid = Grid::new(stats.clone());
    for _ in 0..house_count {
        grid.connect_house(House::random(&stats, rng));
    }

    info!("setting up grid");
    grid.set_up(start, rng)?;
    info!(elapsed = ?preparation.elapsed(), "preparation finished");

    let end = start + one_day() * days as i32;
    let mut current = start;
    while current < end {
        info!(day = %current.date(), "calculating power draw");
        let day_timer = Instant::now();

        let progress = ProgressBar::new(house_count as u64);
        for connection in grid.connections_mut() {
            connection.house_mut().tick(rng)?;
            progress.inc(1);
        }
        progress.finish_and_clear();

        grid.tick(rng)?;
        info!(elapsed = ?day_timer.elapsed(), "day finished");

        current += one_day();
    }

    // the actual base demand comes straight from the recorded system load
    let mut actual = Profile::with_values(start, stats.actual_demand.demand.get(start, end));
    actual.scale(house_count as f64 / stats.actual_demand.household_count);
    let draw = stats.average_household_draw.get(start, end);
    let actual_base_demand: Vec<f64> = actual
        .get(start, end)
        .iter()
        .zip(&draw)
        .map(|(total, household)| total - household * house_count as f64)
        .collect();

    Ok(SimulationOutput {
        start,
        days,
        house_count,
        predicted_base_demand: grid.predicted_base_demand.get(start, end),
        actual_base_demand,
        target_demand: grid.target_demand.get(start, end),
        smart_demand: grid.smart_demand.get(start, end),
        uncontrolled_demand: grid.uncontrolled_demand.get(start, end),
        spread_out_demand: grid.spread_out_demand.get(start, end),
        price_ratio: grid.cheap_price_ratio.get(start, end),
    })
}

/// Writes `desc.txt` and `data.csv`. The output directory is only created
/// here, after the simulation has completed, so failed runs leave nothing
/// behind.
pub fn write_outputs(
    output_dir: &Path,
    output: &SimulationOutput,
    price: &PriceConfig,
) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output folder {}", output_dir.display()))?;

    let desc_path = output_dir.join("desc.txt");
    let mut desc = File::create(&desc_path)
        .with_context(|| format!("creating {}", desc_path.display()))?;
    writeln!(desc, "startingDatetime={}", output.start)?;
    writeln!(desc, "simulationLength={}", output.days)?;
    writeln!(desc, "houseCount={}", output.house_count)?;
    writeln!(desc, "lowerPrice={}", price.lower_price)?;
    writeln!(desc, "higherPrice={}", price.higher_price)?;
    writeln!(desc, "cheapIntervalLength={}", price.cheap_interval_length)?;
    writeln!(desc, "cheapMinutesTotal={}", price.cheap_minutes_count)?;

    let data_path = output_dir.join("data.csv");
    let mut writer = csv::Writer::from_path(&data_path)
        .with_context(|| format!("creating {}", data_path.display()))?;
    writer.write_record([
        "Datetime",
        "PredictedBaseDemand",
        "ActualBaseDemand",
        "TargetDemand",
        "SmartDemand",
        "UncontrolledDemand",
        "SpreadOutDemand",
        "PriceRatio",
    ])?;

    let rows = output.days as i64 * MINUTES_PER_DAY;
    for row in 0..rows as usize {
        let timestamp = output.start + Duration::minutes(row as i64);
        writer.write_record([
            timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            format!("{:.5}", output.predicted_base_demand[row]),
            format!("{:.5}", output.actual_base_demand[row]),
            format!("{:.5}", output.target_demand[row]),
            format!("{:.5}", output.smart_demand[row]),
            format!("{:.5}", output.uncontrolled_demand[row]),
            format!("{:.5}", output.spread_out_demand[row]),
            format!("{:.5}", output.price_ratio[row]),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
