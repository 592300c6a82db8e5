//! # Simulated households
//!
//! A house owns a set of appliances, relays the realized price profile to
//! them and aggregates their per-policy demand curves day by day.

use anyhow::Result;
use chrono::NaiveDateTime;
use rand::rngs::StdRng;
use rand::Rng;

use crate::appliance::Appliance;
use crate::profile::Profile;
use crate::statistics::StatisticsBundle;
use crate::utils::{one_day, random_with_relative_probs};

#[derive(Debug, Default)]
pub struct House {
    /// Midnight following the last fully calculated day.
    current_dt: NaiveDateTime,
    appliances: Vec<Appliance>,
    price_profile: Profile,
    smart_demand: Profile,
    uncontrolled_demand: Profile,
    spread_out_demand: Profile,
}

impl House {
    pub fn new() -> Self {
        Self::default()
    }

    /// A household with a random appliance mix drawn from the ownership
    /// statistics: zero to four cars, then one roll per appliance class.
    pub fn random(stats: &StatisticsBundle, rng: &mut StdRng) -> Self {
        let mut house = Self::new();

        let car_count = random_with_relative_probs(&stats.car_count_probabilities, rng);
        for index in 0..car_count {
            house.add_appliance(Appliance::battery(stats.cars[index].clone(), rng));
        }

        if rng.gen::<f64>() < stats.ownership.air_conditioning {
            house.add_appliance(Appliance::accumulator(stats.air_conditioning.clone(), rng));
        }
        if rng.gen::<f64>() < stats.ownership.electrical_heating {
            house.add_appliance(Appliance::accumulator(stats.electrical_heating.clone(), rng));
        }
        if rng.gen::<f64>() < stats.ownership.water_heater {
            house.add_appliance(Appliance::accumulator(stats.water_heater.clone(), rng));
        }
        if rng.gen::<f64>() < stats.ownership.fridge {
            house.add_appliance(Appliance::accumulator(stats.fridge.clone(), rng));
        }
        if rng.gen::<f64>() < stats.ownership.washing_machine {
            house.add_appliance(Appliance::machine(stats.washing_machine.clone()));
        }
        if rng.gen::<f64>() < stats.ownership.dishwasher {
            house.add_appliance(Appliance::machine(stats.dishwasher.clone()));
        }

        house
    }

    pub fn add_appliance(&mut self, appliance: Appliance) {
        self.appliances.push(appliance);
    }

    pub fn appliance_count(&self) -> usize {
        self.appliances.len()
    }

    pub fn set_up(&mut self, dt: NaiveDateTime, rng: &mut StdRng) -> Result<()> {
        self.current_dt = dt;
        for appliance in &mut self.appliances {
            appliance.set_up(dt, rng)?;
        }
        Ok(())
    }

    /// Advances one day: prunes stale profiles, ticks every appliance and
    /// aggregates the demand they just calculated.
    pub fn tick(&mut self, rng: &mut StdRng) -> Result<()> {
        let horizon = self.current_dt - one_day();
        self.price_profile.prune(horizon);
        self.smart_demand.prune(horizon);
        self.uncontrolled_demand.prune(horizon);
        self.spread_out_demand.prune(horizon);

        for appliance in &mut self.appliances {
            appliance.tick(rng)?;
        }

        self.current_dt += one_day();
        self.collect_appliance_demand(self.current_dt - one_day(), self.current_dt);
        Ok(())
    }

    /// Stores the price profile and forwards it unchanged to every
    /// appliance.
    pub fn set_price_profile(&mut self, dt: NaiveDateTime, prices: &[f64]) {
        self.price_profile.set(dt, prices);
        for appliance in &mut self.appliances {
            appliance.set_price_profile(dt, prices);
        }
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

    fn collect_appliance_demand(&mut self, from: NaiveDateTime, to: NaiveDateTime) {
        for appliance in &self.appliances {
            self.smart_demand.add(from, &appliance.smart_demand(from, to));
            self.uncontrolled_demand
                .add(from, &appliance.uncontrolled_demand(from, to));
            self.spread_out_demand
                .add(from, &appliance.spread_out_demand(from, to));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::fixtures::test_bundle;
    use chrono::{NaiveDate, NaiveTime};
    use rand::SeedableRng;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 7, 1)
            .unwrap()
            .and_time(NaiveTime::MIN)
    }

    #[test]
    fn test_random_houses_follow_ownership_statistics() {
        let stats = test_bundle(start().date(), 3);
        let mut rng = StdRng::seed_from_u64(42);

        let counts: Vec<usize> = (0..200)
            .map(|_| House::random(&stats, &mut rng).appliance_count())
            .collect();
        let average = counts.iter().sum::<usize>() as f64 / counts.len() as f64;

        // expected appliances per house: ~1.1 cars + 0.6 + 0.3 + 0.5 + 0.95
        // accumulators + 0.6 + 0.8 machines ~= 4.85
        assert!(average > 3.5 && average < 6.0, "average {average}");
    }

    #[test]
    fn test_tick_aggregates_appliance_demand() {
        let stats = test_bundle(start().date(), 3);
        let mut rng = StdRng::seed_from_u64(7);

        let mut house = House::new();
        house.add_appliance(Appliance::accumulator(stats.fridge.clone(), &mut rng));
        house.add_appliance(Appliance::accumulator(stats.water_heater.clone(), &mut rng));
        house.set_up(start(), &mut rng).unwrap();
        house.set_price_profile(start() - one_day(), &vec![0.1; 4 * 1440]);

        house.tick(&mut rng).unwrap();

        let day = house.smart_demand(start(), start() + one_day());
        assert_eq!(day.len(), 1440);
        // two accumulators against a steady 0.5 kW drain must charge at
        // some point during the day
        assert!(day.iter().sum::<f64>() > 0.0);

        // aggregate equals the sum over appliances
        let by_hand: f64 = house
            .appliances
            .iter()
            .map(|a| a.smart_demand(start(), start() + one_day()).iter().sum::<f64>())
            .sum();
        assert!((day.iter().sum::<f64>() - by_hand).abs() < 1e-9);
    }
}
