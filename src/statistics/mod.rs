//! # Loaded simulation statistics
//!
//! `StatisticsBundle` gathers every empirical input the simulation consumes:
//! per-class appliance statistics, appliance ownership ratios, the car-count
//! distribution, grid demand data and the price configuration. It is loaded
//! once at startup and shared read-only by every component.

pub mod appliance;
pub mod grid;

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::SimError;
use crate::profile::Profile;
use appliance::{AccumulatorStatistics, BatteryStatistics, MachineStatistics};
use grid::{GridDemandStatistics, ERCOT_HOUSEHOLDS};

/// How many car classes a single household can own at most.
pub const CAR_CLASSES: usize = 4;

/// Machines can start after ~21:00 and must finish by ~05:00 the next
/// morning (minute-of-day Gaussians).
const MACHINE_START_AFTER: (f64, f64) = (21.0 * 60.0, 60.0);
const MACHINE_FINISH_BY: (f64, f64) = (5.0 * 60.0, 60.0);

/// Spread of individual discharging behavior around the class average.
const DISCHARGING_SCALE: (f64, f64) = (1.0, 0.3);

/// Dynamic-pricing parameters broadcast by the grid.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PriceConfig {
    /// Length of one cheap-price interval in minutes.
    #[validate(range(min = 0, max = 720))]
    pub cheap_interval_length: i64,

    /// Guaranteed cheap minutes per day; zero disables the guarantee and
    /// prices each minute independently.
    #[validate(range(min = 0, max = 1440))]
    pub cheap_minutes_count: i64,

    #[validate(range(min = 0.0))]
    pub lower_price: f64,

    #[validate(range(min = 0.0))]
    pub higher_price: f64,
}

/// Fraction of households owning each appliance class.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnershipRatios {
    pub air_conditioning: f64,
    pub electrical_heating: f64,
    pub fridge: f64,
    pub water_heater: f64,
    pub dishwasher: f64,
    pub washing_machine: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct CapacityParams {
    mean: f64,
    std: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplianceCapacities {
    air_conditioning: CapacityParams,
    electrical_heating: CapacityParams,
    fridge: CapacityParams,
    water_heater: CapacityParams,
}

/// Everything the simulation knows about the world, loaded once.
#[derive(Debug)]
pub struct StatisticsBundle {
    /// Per-car-index statistics; a household's first car behaves differently
    /// from its fourth.
    pub cars: Vec<Arc<BatteryStatistics>>,
    /// Probability of a household owning exactly 0..=4 cars.
    pub car_count_probabilities: Vec<f64>,
    /// Probability of a household owning at least 0..=4 cars.
    pub at_least_this_many_cars: Vec<f64>,
    pub ownership: OwnershipRatios,
    pub air_conditioning: Arc<AccumulatorStatistics>,
    pub electrical_heating: Arc<AccumulatorStatistics>,
    pub fridge: Arc<AccumulatorStatistics>,
    pub water_heater: Arc<AccumulatorStatistics>,
    pub dishwasher: Arc<MachineStatistics>,
    pub washing_machine: Arc<MachineStatistics>,
    pub demand_forecast: GridDemandStatistics,
    pub actual_demand: GridDemandStatistics,
    pub average_household_draw: Profile,
    pub price: PriceConfig,
}

impl StatisticsBundle {
    /// Loads every dataset from its fixed location under `data_dir`.
    pub fn load(data_dir: &Path) -> Result<Self> {
        let manual = data_dir.join("manual");
        let dataport = data_dir.join("dataport");
        let nhts = data_dir.join("nhts");

        let price: PriceConfig = read_json(&manual.join("priceConfig.json"))?;
        price
            .validate()
            .map_err(|e| SimError::Configuration(format!("priceConfig.json: {e}")))?;
        if price.lower_price > price.higher_price {
            return Err(SimError::Configuration(
                "priceConfig.json: lowerPrice exceeds higherPrice".to_string(),
            )
            .into());
        }
        if price.cheap_minutes_count > 0 && price.cheap_interval_length == 0 {
            return Err(SimError::Configuration(
                "priceConfig.json: cheapMinutesCount requires a nonzero cheapIntervalLength"
                    .to_string(),
            )
            .into());
        }

        let ownership: OwnershipRatios = read_json(&manual.join("ownershipRatios.json"))?;
        let capacities: ApplianceCapacities = read_json(&manual.join("applianceCapacities.json"))?;

        let car_count_probabilities =
            load_car_count_probabilities(&nhts.join("cars/ownershipRatios.csv"))?;
        let at_least_this_many_cars = (0..car_count_probabilities.len())
            .map(|i| car_count_probabilities[i..].iter().sum())
            .collect();

        let mut cars = Vec::with_capacity(CAR_CLASSES);
        for index in 1..=CAR_CLASSES {
            let car_dir = nhts.join(format!("cars/car{index}"));
            cars.push(Arc::new(BatteryStatistics::load(
                &format!("car{index}"),
                &car_dir.join("usageRatios.csv"),
                &car_dir.join("trips.txt"),
                &car_dir.join("availability.csv"),
                &dataport.join("cars/charges.txt"),
                &dataport.join("cars/maxPowers.txt"),
            )?));
        }

        let accumulator = |name: &str, dir: &str, capacity: CapacityParams| {
            let class_dir = dataport.join("accumulators").join(dir);
            AccumulatorStatistics::load(
                name,
                (capacity.mean, capacity.std),
                DISCHARGING_SCALE,
                &class_dir.join("maxPowers.txt"),
                &class_dir.join("averageUsage.csv"),
            )
            .map(Arc::new)
        };

        let machine = |name: &str, dir: &str| {
            let class_dir = dataport.join("machines").join(dir);
            MachineStatistics::load(
                name,
                MACHINE_START_AFTER,
                MACHINE_FINISH_BY,
                &class_dir.join("usages.csv"),
                &class_dir.join("profiles.txt"),
            )
            .map(Arc::new)
        };

        Ok(Self {
            cars,
            car_count_probabilities,
            at_least_this_many_cars,
            ownership,
            air_conditioning: accumulator(
                "airConditioning",
                "airconditioning",
                capacities.air_conditioning,
            )?,
            electrical_heating: accumulator(
                "electricalHeating",
                "electricalheating",
                capacities.electrical_heating,
            )?,
            fridge: accumulator("fridge", "fridge", capacities.fridge)?,
            water_heater: accumulator("waterHeater", "waterheater", capacities.water_heater)?,
            dishwasher: machine("dishwasher", "dishwasher")?,
            washing_machine: machine("washingMachine", "washingmachine")?,
            demand_forecast: GridDemandStatistics::load(
                &dataport.join("ercot/predictions/96.csv"),
                ERCOT_HOUSEHOLDS,
            )?,
            actual_demand: GridDemandStatistics::load(
                &dataport.join("ercot/actual/systemLoad.csv"),
                ERCOT_HOUSEHOLDS,
            )?,
            average_household_draw: Profile::from_csv(&dataport.join("household/averageDraw.csv"))?,
            price,
        })
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(file).with_context(|| format!("parsing {}", path.display()))
}

/// `carCount,ratio` rows, ascending car count starting at zero.
fn load_car_count_probabilities(path: &Path) -> Result<Vec<f64>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    let ratio_column = reader
        .headers()
        .ok()
        .and_then(|h| h.iter().position(|name| name.trim() == "ratio"))
        .unwrap_or(1);

    let mut probabilities = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("reading {}", path.display()))?;
        let value: f64 = record
            .get(ratio_column)
            .ok_or_else(|| SimError::malformed(path, "missing ratio column"))?
            .trim()
            .parse()
            .map_err(|_| SimError::malformed(path, "bad ratio"))?;
        probabilities.push(value);
    }
    if probabilities.len() != CAR_CLASSES + 1 {
        return Err(SimError::malformed(
            path,
            format!("expected {} rows, got {}", CAR_CLASSES + 1, probabilities.len()),
        )
        .into());
    }
    Ok(probabilities)
}

/// Synthetic bundle used by the component and end-to-end tests: constant
/// statistics over a window of days around `start`, a sine-shaped grid load
/// and undemanding price parameters.
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::{Duration, NaiveDate, NaiveTime};
    use std::collections::HashMap;

    pub fn test_bundle(start: NaiveDate, days: i64) -> StatisticsBundle {
        let profile_start = (start - Duration::days(5)).and_time(NaiveTime::MIN);
        let profile_days = days + 12;
        let profile_len = (profile_days * 1440) as usize;

        let dates: Vec<NaiveDate> = (-5..profile_days - 5).map(|d| start + Duration::days(d)).collect();

        let constant = |value: f64| -> HashMap<NaiveDate, f64> {
            dates.iter().map(|&d| (d, value)).collect()
        };

        let mut cars = Vec::new();
        for index in 1..=CAR_CLASSES {
            cars.push(Arc::new(BatteryStatistics {
                name: format!("car{index}"),
                charging_powers: vec![7.2],
                usage_probabilities: constant(0.6),
                needed_charges: dates.iter().map(|&d| (d, vec![8.0, 12.0])).collect(),
                average_needed_charge: constant(6.0),
                usage_intervals: dates
                    .iter()
                    .map(|&d| {
                        (
                            d,
                            vec![(
                                NaiveTime::from_hms_opt(8, 0, 0),
                                NaiveTime::from_hms_opt(18, 0, 0),
                            )],
                        )
                    })
                    .collect(),
                availability_profile: Profile::with_values(profile_start, vec![0.7; profile_len]),
            }));
        }

        let accumulator = |name: &str| {
            Arc::new(AccumulatorStatistics {
                name: name.to_string(),
                charging_powers: vec![2.0],
                average_charging_power: 2.0,
                capacity: rand_distr::Normal::new(4.0, 0.5).unwrap(),
                discharging_scale: rand_distr::Normal::new(1.0, 0.3).unwrap(),
                discharging_profile: Profile::with_values(profile_start, vec![0.5; profile_len]),
                average_daily_charge: constant(12.0),
            })
        };

        let machine = |name: &str| {
            Arc::new(MachineStatistics {
                name: name.to_string(),
                start_after: rand_distr::Normal::new(21.0 * 60.0, 60.0).unwrap(),
                finish_by: rand_distr::Normal::new(5.0 * 60.0, 60.0).unwrap(),
                usage_probabilities: constant(0.5),
                usage_profiles: vec![vec![1.5; 90]],
                average_power_needed: constant(1.125),
            })
        };

        // one sine cycle per day, peaking mid-afternoon
        let system_load: Vec<f64> = (0..profile_len)
            .map(|m| {
                let phase = 2.0 * std::f64::consts::PI * (m % 1440) as f64 / 1440.0;
                80.0 + 20.0 * (phase - 0.75 * std::f64::consts::PI).sin()
            })
            .collect();

        StatisticsBundle {
            cars,
            car_count_probabilities: vec![0.3, 0.4, 0.2, 0.08, 0.02],
            at_least_this_many_cars: vec![1.0, 0.7, 0.3, 0.1, 0.02],
            ownership: OwnershipRatios {
                air_conditioning: 0.6,
                electrical_heating: 0.3,
                fridge: 0.95,
                water_heater: 0.5,
                dishwasher: 0.6,
                washing_machine: 0.8,
            },
            air_conditioning: accumulator("airConditioning"),
            electrical_heating: accumulator("electricalHeating"),
            fridge: accumulator("fridge"),
            water_heater: accumulator("waterHeater"),
            dishwasher: machine("dishwasher"),
            washing_machine: machine("washingMachine"),
            demand_forecast: GridDemandStatistics {
                household_count: 100.0,
                demand: Profile::with_values(profile_start, system_load.clone()),
            },
            actual_demand: GridDemandStatistics {
                household_count: 100.0,
                demand: Profile::with_values(profile_start, system_load),
            },
            average_household_draw: Profile::with_values(profile_start, vec![0.4; profile_len]),
            price: PriceConfig {
                cheap_interval_length: 60,
                cheap_minutes_count: 480,
                lower_price: 0.05,
                higher_price: 0.15,
            },
        }
    }
}
