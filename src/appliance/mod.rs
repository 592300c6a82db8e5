//! # Household appliances
//!
//! One `Appliance` per physical device. The behavioral differences between
//! the three device families live in the `ApplianceKind` variants; the
//! common clockwork (price profile, the three per-policy demand profiles,
//! the daily tick) lives here. Every appliance computes its demand under
//! all three control policies side by side so the aggregate curves can be
//! compared.

pub mod accumulator;
pub mod battery;
pub mod machine;

use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDateTime;
use rand::rngs::StdRng;

use crate::profile::Profile;
use crate::statistics::appliance::{
    AccumulatorStatistics, BatteryStatistics, MachineStatistics,
};
use crate::utils::one_day;

pub use accumulator::Accumulator;
pub use battery::Battery;
pub use machine::Machine;

#[derive(Debug)]
pub enum ApplianceKind {
    Battery(Battery),
    Accumulator(Accumulator),
    Machine(Machine),
}

#[derive(Debug)]
pub struct Appliance {
    /// Midnight following the last fully calculated day.
    current_dt: NaiveDateTime,
    /// Electricity price for any given minute, pushed in by the house.
    price_profile: Profile,
    smart_demand: Profile,
    uncontrolled_demand: Profile,
    spread_out_demand: Profile,
    kind: ApplianceKind,
}

impl Appliance {
    fn with_kind(kind: ApplianceKind) -> Self {
        Self {
            current_dt: NaiveDateTime::default(),
            price_profile: Profile::new(),
            smart_demand: Profile::new(),
            uncontrolled_demand: Profile::new(),
            spread_out_demand: Profile::new(),
            kind,
        }
    }

    /// An electric car with a random charging power for its class.
    pub fn battery(stats: Arc<BatteryStatistics>, rng: &mut StdRng) -> Self {
        Self::with_kind(ApplianceKind::Battery(Battery::random(stats, rng)))
    }

    /// An accumulator appliance with random capacity and discharging scale.
    pub fn accumulator(stats: Arc<AccumulatorStatistics>, rng: &mut StdRng) -> Self {
        Self::with_kind(ApplianceKind::Accumulator(Accumulator::random(stats, rng)))
    }

    pub fn machine(stats: Arc<MachineStatistics>) -> Self {
        Self::with_kind(ApplianceKind::Machine(Machine::new(stats)))
    }

    /// Prepares the appliance for a simulation starting at `dt`.
    pub fn set_up(&mut self, dt: NaiveDateTime, rng: &mut StdRng) -> Result<()> {
        self.current_dt = dt;
        self.generate_usage(dt, dt + one_day(), rng)
    }

    /// Advances one day: drops stale history, generates usage one more day
    /// ahead and calculates the next day of demand under all policies.
    pub fn tick(&mut self, rng: &mut StdRng) -> Result<()> {
        let horizon = self.current_dt - one_day();
        self.price_profile.prune(horizon);
        self.smart_demand.prune(horizon);
        self.uncontrolled_demand.prune(horizon);
        self.spread_out_demand.prune(horizon);
        if let ApplianceKind::Accumulator(accumulator) = &mut self.kind {
            accumulator.prune(horizon);
        }

        self.generate_usage(self.current_dt + one_day(), self.current_dt + one_day() * 2, rng)?;
        self.calculate_demand(self.current_dt, self.current_dt + one_day())?;

        self.current_dt += one_day();
        Ok(())
    }

    fn generate_usage(
        &mut self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        rng: &mut StdRng,
    ) -> Result<()> {
        match &mut self.kind {
            ApplianceKind::Battery(battery) => battery.generate_usage(from, to, rng),
            ApplianceKind::Accumulator(accumulator) => {
                accumulator.generate_usage(from, to);
                Ok(())
            }
            ApplianceKind::Machine(machine) => machine.generate_usage(from, to, rng),
        }
    }

    fn calculate_demand(&mut self, from: NaiveDateTime, to: NaiveDateTime) -> Result<()> {
        let Self {
            price_profile,
            smart_demand,
            uncontrolled_demand,
            spread_out_demand,
            kind,
            ..
        } = self;
        match kind {
            ApplianceKind::Battery(battery) => {
                battery.calculate_smart_demand(price_profile, smart_demand, from, to)?;
                battery.calculate_uncontrolled_demand(uncontrolled_demand, from, to)?;
                battery.calculate_spread_out_demand(spread_out_demand, from, to)?;
            }
            ApplianceKind::Accumulator(accumulator) => {
                accumulator.calculate_smart_demand(price_profile, smart_demand, from, to);
                accumulator.calculate_uncontrolled_demand(uncontrolled_demand, from, to);
                accumulator.calculate_spread_out_demand(spread_out_demand, from, to);
            }
            ApplianceKind::Machine(machine) => {
                machine.calculate_smart_demand(price_profile, smart_demand, from, to)?;
                machine.calculate_uncontrolled_demand(uncontrolled_demand, from, to)?;
                machine.calculate_spread_out_demand(spread_out_demand, from, to)?;
            }
        }
        Ok(())
    }

    /// Stores the price profile the grid connection realized for the house.
    pub fn set_price_profile(&mut self, dt: NaiveDateTime, prices: &[f64]) {
        self.price_profile.set(dt, prices);
    }

    pub fn smart_demand(&self, from: NaiveDateTime, to: NaiveDateTime) -> Vec<f64> {
        self.smart_demand.get(from, to)
    }

    pub fn uncontrolled_demand(&self, from: NaiveDateTime, to: NaiveDateTime) -> Vec<f64> {
        self.uncontrolled_demand.get(from, to)
    }

    pub fn spread_out_demand(&self, from: NaiveDateTime, to: NaiveDateTime) -> Vec<f64> {
        self.spread_out_demand.get(from, to)
    }
}
