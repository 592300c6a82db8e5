//! # Appliance usage statistics
//!
//! Empirical per-class data the appliance models sample from: charging
//! powers, per-date usage probabilities, needed charges, usage intervals,
//! discharging profiles and machine run profiles. Everything is immutable
//! after loading; the only behavior on top of the data is random sampling.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{NaiveDate, NaiveTime};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::SimError;
use crate::profile::Profile;
use crate::utils::{time_from_minute_of_day, MINUTES_PER_DAY};

/// A (disconnection, connection) pair; `None` marks an endpoint the source
/// data does not pin down.
pub type UsageInterval = (Option<NaiveTime>, Option<NaiveTime>);

/// Statistics of battery-backed appliances (electric cars).
#[derive(Debug, Clone)]
pub struct BatteryStatistics {
    pub name: String,
    pub charging_powers: Vec<f64>,
    pub usage_probabilities: HashMap<NaiveDate, f64>,
    pub needed_charges: HashMap<NaiveDate, Vec<f64>>,
    /// Per-date mean needed charge already weighted by the usage probability.
    pub average_needed_charge: HashMap<NaiveDate, f64>,
    pub usage_intervals: HashMap<NaiveDate, Vec<UsageInterval>>,
    /// Fraction of this car class at home, minute by minute.
    pub availability_profile: Profile,
}

impl BatteryStatistics {
    pub fn load(
        name: &str,
        usage_ratios: &Path,
        trips: &Path,
        availability: &Path,
        charges: &Path,
        max_powers: &Path,
    ) -> Result<Self> {
        let usage_probabilities = load_date_value_csv(usage_ratios)?;

        let mut needed_charges = HashMap::new();
        let mut average_needed_charge = HashMap::new();
        for (date, body) in load_dated_lines(charges)? {
            let values = parse_float_list(&body)
                .ok_or_else(|| SimError::malformed(charges, format!("bad charge list for {date}")))?;
            let probability = *usage_probabilities
                .get(&date)
                .ok_or_else(|| SimError::missing(name, date))?;
            average_needed_charge
                .insert(date, values.iter().sum::<f64>() / values.len() as f64 * probability);
            needed_charges.insert(date, values);
        }

        let mut usage_intervals: HashMap<NaiveDate, Vec<UsageInterval>> = HashMap::new();
        for (date, body) in load_dated_lines(trips)? {
            let intervals = usage_intervals.entry(date).or_default();
            if body.is_empty() {
                intervals.push((None, None));
            } else {
                for token in body.split(',') {
                    intervals.push(parse_interval(token.trim()));
                }
            }
        }

        Ok(Self {
            name: name.to_string(),
            charging_powers: load_floats(max_powers)?,
            usage_probabilities,
            needed_charges,
            average_needed_charge,
            usage_intervals,
            availability_profile: Profile::from_csv(availability)?,
        })
    }

    pub fn random_charging_power(&self, rng: &mut StdRng) -> f64 {
        self.charging_powers[rng.gen_range(0..self.charging_powers.len())]
    }

    pub fn usage_probability(&self, date: NaiveDate) -> Result<f64> {
        self.usage_probabilities
            .get(&date)
            .copied()
            .ok_or_else(|| SimError::missing(&self.name, date).into())
    }

    pub fn average_needed_charge(&self, date: NaiveDate) -> Result<f64> {
        self.average_needed_charge
            .get(&date)
            .copied()
            .ok_or_else(|| SimError::missing(&self.name, date).into())
    }

    /// Charge in kWh the car needs after a day's driving; zero when the
    /// usage-probability roll says the car stayed home.
    pub fn random_needed_charge(&self, date: NaiveDate, rng: &mut StdRng) -> Result<f64> {
        if rng.gen::<f64>() < self.usage_probability(date)? {
            let charges = self
                .needed_charges
                .get(&date)
                .ok_or_else(|| SimError::missing(&self.name, date))?;
            Ok(charges[rng.gen_range(0..charges.len())])
        } else {
            Ok(0.0)
        }
    }

    /// A random usage interval for the date. Dates without recorded trips
    /// yield fully open intervals; callers substitute the defaults.
    pub fn random_usage_interval(&self, date: NaiveDate, rng: &mut StdRng) -> UsageInterval {
        match self.usage_intervals.get(&date) {
            Some(intervals) if !intervals.is_empty() => {
                intervals[rng.gen_range(0..intervals.len())]
            }
            _ => (None, None),
        }
    }
}

/// Statistics of accumulator appliances (water heater, fridge, A/C,
/// electrical heating).
#[derive(Debug, Clone)]
pub struct AccumulatorStatistics {
    pub name: String,
    pub charging_powers: Vec<f64>,
    pub average_charging_power: f64,
    pub capacity: Normal<f64>,
    pub discharging_scale: Normal<f64>,
    /// Reference kW draw by minute of the year for the whole class.
    pub discharging_profile: Profile,
    /// kWh the class discharges on average per calendar day.
    pub average_daily_charge: HashMap<NaiveDate, f64>,
}

impl AccumulatorStatistics {
    pub fn load(
        name: &str,
        capacity: (f64, f64),
        discharging_scale: (f64, f64),
        max_powers: &Path,
        average_usage: &Path,
    ) -> Result<Self> {
        let charging_powers = load_floats(max_powers)?;
        let average_charging_power =
            charging_powers.iter().sum::<f64>() / charging_powers.len() as f64;
        let discharging_profile = Profile::from_csv(average_usage)?;
        let average_daily_charge = discharging_profile
            .daily_averages()
            .into_iter()
            .map(|(date, kw)| (date, kw * 24.0))
            .collect();

        Ok(Self {
            name: name.to_string(),
            charging_powers,
            average_charging_power,
            capacity: gaussian(name, capacity)?,
            discharging_scale: gaussian(name, discharging_scale)?,
            discharging_profile,
            average_daily_charge,
        })
    }

    pub fn random_charging_power(&self, rng: &mut StdRng) -> f64 {
        self.charging_powers[rng.gen_range(0..self.charging_powers.len())]
    }

    pub fn random_capacity(&self, rng: &mut StdRng) -> f64 {
        self.capacity.sample(rng)
    }

    pub fn random_discharging_scale(&self, rng: &mut StdRng) -> f64 {
        self.discharging_scale.sample(rng)
    }

    pub fn average_daily_charge(&self, date: NaiveDate) -> Result<f64> {
        self.average_daily_charge
            .get(&date)
            .copied()
            .ok_or_else(|| SimError::missing(&self.name, date).into())
    }
}

/// Statistics of machine appliances (dishwasher, washing machine).
#[derive(Debug, Clone)]
pub struct MachineStatistics {
    pub name: String,
    pub start_after: Normal<f64>,
    pub finish_by: Normal<f64>,
    pub usage_probabilities: HashMap<NaiveDate, f64>,
    pub usage_profiles: Vec<Vec<f64>>,
    /// Mean kWh per run weighted by the per-date usage probability.
    pub average_power_needed: HashMap<NaiveDate, f64>,
}

impl MachineStatistics {
    pub fn load(
        name: &str,
        start_after: (f64, f64),
        finish_by: (f64, f64),
        usages: &Path,
        profiles: &Path,
    ) -> Result<Self> {
        let usage_probabilities = load_date_value_csv(usages)?;

        let raw = fs::read_to_string(profiles)
            .with_context(|| format!("reading {}", profiles.display()))?;
        let mut usage_profiles = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            let profile = parse_float_list(line)
                .ok_or_else(|| SimError::malformed(profiles, "bad power list"))?;
            usage_profiles.push(profile);
        }
        if usage_profiles.is_empty() {
            return Err(SimError::malformed(profiles, "no usage profiles").into());
        }

        let mean_run_kwh = usage_profiles
            .iter()
            .map(|p| p.iter().sum::<f64>() / 60.0)
            .sum::<f64>()
            / usage_profiles.len() as f64;
        let average_power_needed = usage_probabilities
            .iter()
            .map(|(&date, &probability)| (date, mean_run_kwh * probability))
            .collect();

        Ok(Self {
            name: name.to_string(),
            start_after: gaussian(name, start_after)?,
            finish_by: gaussian(name, finish_by)?,
            usage_probabilities,
            usage_profiles,
            average_power_needed,
        })
    }

    pub fn usage_probability(&self, date: NaiveDate) -> Result<f64> {
        self.usage_probabilities
            .get(&date)
            .copied()
            .ok_or_else(|| SimError::missing(&self.name, date).into())
    }

    pub fn average_power_needed(&self, date: NaiveDate) -> Result<f64> {
        self.average_power_needed
            .get(&date)
            .copied()
            .ok_or_else(|| SimError::missing(&self.name, date).into())
    }

    pub fn random_start_after(&self, rng: &mut StdRng) -> NaiveTime {
        sample_minute_of_day(self.start_after, rng)
    }

    pub fn random_finish_by(&self, rng: &mut StdRng) -> NaiveTime {
        sample_minute_of_day(self.finish_by, rng)
    }

    pub fn random_usage_profile(&self, rng: &mut StdRng) -> usize {
        rng.gen_range(0..self.usage_profiles.len())
    }
}

fn sample_minute_of_day(dist: Normal<f64>, rng: &mut StdRng) -> NaiveTime {
    let minute = (dist.sample(rng).floor() as i64).clamp(0, MINUTES_PER_DAY - 1);
    time_from_minute_of_day(minute)
}

fn gaussian(name: &str, (mean, std): (f64, f64)) -> Result<Normal<f64>> {
    Normal::new(mean, std)
        .map_err(|e| SimError::Configuration(format!("bad {name} distribution: {e}")).into())
}

/// One float per non-empty line; the file must not be empty.
pub fn load_floats(path: &Path) -> Result<Vec<f64>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut values = Vec::new();
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        values.push(
            line.trim()
                .parse::<f64>()
                .map_err(|_| SimError::malformed(path, format!("bad float {line:?}")))?,
        );
    }
    if values.is_empty() {
        return Err(SimError::malformed(path, "no values").into());
    }
    Ok(values)
}

/// CSV with a header and (date, value) rows.
pub fn load_date_value_csv(path: &Path) -> Result<HashMap<NaiveDate, f64>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    let mut map = HashMap::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("reading {}", path.display()))?;
        let raw_date = record
            .get(0)
            .ok_or_else(|| SimError::malformed(path, "missing date column"))?
            .trim();
        let date = parse_date(raw_date)
            .ok_or_else(|| SimError::malformed(path, format!("bad date {raw_date:?}")))?;
        let value: f64 = record
            .get(1)
            .ok_or_else(|| SimError::malformed(path, "missing value column"))?
            .trim()
            .parse()
            .map_err(|_| SimError::malformed(path, format!("bad value for {date}")))?;
        map.insert(date, value);
    }
    Ok(map)
}

/// Lines of the form `YYYY-MM-DD: [body]`, yielding the date and the body
/// with brackets and padding stripped (possibly empty).
fn load_dated_lines(path: &Path) -> Result<Vec<(NaiveDate, String)>> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let mut lines = Vec::new();
    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        let line = line.trim();
        let date = line
            .get(..10)
            .and_then(parse_date)
            .ok_or_else(|| SimError::malformed(path, format!("bad date in line {line:?}")))?;
        let body = line
            .get(11..)
            .unwrap_or("")
            .trim_matches(|c: char| c == '[' || c == ']' || c.is_whitespace())
            .to_string();
        lines.push((date, body));
    }
    Ok(lines)
}

fn parse_float_list(body: &str) -> Option<Vec<f64>> {
    let values: Option<Vec<f64>> = body
        .split(',')
        .map(|token| token.trim().parse::<f64>().ok())
        .collect();
    values.filter(|v| !v.is_empty())
}

/// `HH:MM-HH:MM`; anything shorter means an unbounded interval.
fn parse_interval(token: &str) -> UsageInterval {
    if token.len() < 10 {
        return (None, None);
    }
    let start = token
        .get(..5)
        .and_then(|s| NaiveTime::parse_from_str(s, "%H:%M").ok());
    let end = token
        .get(token.len() - 5..)
        .and_then(|s| NaiveTime::parse_from_str(s, "%H:%M").ok());
    (start, end)
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}
