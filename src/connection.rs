//! # Grid-to-house connections
//!
//! A connection turns the grid's per-minute cheap-price probabilities into a
//! concrete realization for one house: first a 0/1 mask of cheap minutes,
//! then an actual price per minute that gets pushed to the house.

use anyhow::Result;
use chrono::{Duration, NaiveDateTime};
use rand::rngs::StdRng;
use rand::Rng;

use crate::house::House;
use crate::profile::Profile;
use crate::statistics::PriceConfig;
use crate::utils::{
    midnights_between, one_day, random_with_relative_probs, sample_distinct_weighted,
    MINUTES_PER_DAY,
};

#[derive(Debug)]
pub struct Connection {
    /// Midnight following the last fully calculated day.
    current_dt: NaiveDateTime,
    house: House,
    price: PriceConfig,
    /// Probability of the price being cheap in any given minute, set by the
    /// grid.
    cheaper_price_ratio: Profile,
    /// Realized cheap minutes (values > 0 mean cheap).
    cheaper_minutes: Profile,
    /// Realized price per minute.
    price_profile: Profile,
}

impl Connection {
    pub fn new(house: House, price: PriceConfig) -> Self {
        Self {
            current_dt: NaiveDateTime::default(),
            house,
            price,
            cheaper_price_ratio: Profile::new(),
            cheaper_minutes: Profile::new(),
            price_profile: Profile::new(),
        }
    }

    pub fn house_mut(&mut self) -> &mut House {
        &mut self.house
    }

    pub fn set_up(&mut self, dt: NaiveDateTime, rng: &mut StdRng) -> Result<()> {
        self.current_dt = dt;
        self.house.set_up(dt, rng)?;

        self.generate_random_cheaper_intervals(dt - one_day(), dt + one_day() * 2, rng);
        self.generate_price_profile(dt - one_day(), dt + one_day() * 2, rng);
        self.send_price_profile(dt - one_day(), dt + one_day() * 2);
        Ok(())
    }

    /// Advances one day and realizes prices one more day ahead. The house is
    /// ticked separately by the driver, before the grid side moves.
    pub fn tick(&mut self, rng: &mut StdRng) {
        let horizon = self.current_dt - one_day();
        self.cheaper_price_ratio.prune(horizon);
        self.cheaper_minutes.prune(horizon);
        self.price_profile.prune(horizon);

        self.current_dt += one_day();
        let cdt = self.current_dt;

        self.generate_random_cheaper_intervals(cdt + one_day(), cdt + one_day() * 2, rng);
        self.generate_price_profile(cdt + one_day(), cdt + one_day() * 2, rng);
        self.send_price_profile(cdt + one_day(), cdt + one_day() * 2);
    }

    /// Called by the grid with the cheap-price probabilities for a window.
    pub fn set_price_ratio(&mut self, from: NaiveDateTime, ratios: &[f64]) {
        self.cheaper_price_ratio.set(from, ratios);
    }

    /// Realizes the 0/1 cheap-minute mask from the stored probabilities.
    ///
    /// With no guaranteed cheap minutes configured each minute is an
    /// independent Bernoulli draw. Otherwise whole intervals of
    /// `cheap_interval_length` minutes are placed (weighted by probability,
    /// overlaps tolerated) until each day has at least `cheap_minutes_count`
    /// cheap minutes. Interval starts are drawn shifted by one interval
    /// length past midnight so already-broadcast prices of the previous day
    /// stay untouched.
    fn generate_random_cheaper_intervals(
        &mut self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        rng: &mut StdRng,
    ) {
        let interval_length = self.price.cheap_interval_length as usize;
        let cheap_minutes_total = self.price.cheap_minutes_count as f64;

        if self.price.cheap_minutes_count == 0 {
            let probs = self.cheaper_price_ratio.get(from, to);
            let minutes: Vec<f64> = probs
                .iter()
                .map(|&p| if rng.gen::<f64>() < p { 1.0 } else { 0.0 })
                .collect();
            self.cheaper_minutes.add(from, &minutes);
            return;
        }

        for midnight in midnights_between(from, to) {
            let mut intervals = vec![0.0; MINUTES_PER_DAY as usize + 2 * interval_length];

            let shift = Duration::minutes(interval_length as i64);
            let probs = self
                .cheaper_price_ratio
                .get(midnight + shift, midnight + shift + one_day());

            if interval_length == 1 {
                for position in
                    sample_distinct_weighted(&probs, cheap_minutes_total as usize, rng)
                {
                    intervals[position] = 1.0;
                }
            } else {
                while intervals.iter().sum::<f64>() < cheap_minutes_total {
                    let center = random_with_relative_probs(&probs, rng);
                    let start = interval_length + center - interval_length / 2;
                    for minute in &mut intervals[start..start + interval_length] {
                        *minute = 1.0;
                    }
                }
            }

            self.cheaper_minutes.add(midnight, &intervals);
        }
    }

    /// Converts the cheap-minute mask into actual prices. A little jitter is
    /// added so appliances don't all pick the earliest cheap slot.
    fn generate_price_profile(&mut self, from: NaiveDateTime, to: NaiveDateTime, rng: &mut StdRng) {
        let mask = self.cheaper_minutes.get(from, to);
        let prices: Vec<f64> = mask
            .iter()
            .map(|&cheap| {
                let base = if cheap > 0.0 {
                    self.price.lower_price
                } else {
                    self.price.higher_price
                };
                base + rng.gen::<f64>() * 0.01
            })
            .collect();
        self.price_profile.set(from, &prices);
    }

    fn send_price_profile(&mut self, from: NaiveDateTime, to: NaiveDateTime) {
        let prices = self.price_profile.get(from, to);
        self.house.set_price_profile(from, &prices);
    }

    pub fn smart_demand(&self, from: NaiveDateTime, to: NaiveDateTime) -> Vec<f64> {
        self.house.smart_demand(from, to)
    }

    pub fn uncontrolled_demand(&self, from: NaiveDateTime, to: NaiveDateTime) -> Vec<f64> {
        self.house.uncontrolled_demand(from, to)
    }

    pub fn spread_out_demand(&self, from: NaiveDateTime, to: NaiveDateTime) -> Vec<f64> {
        self.house.spread_out_demand(from, to)
    }

    pub fn cheaper_minutes(&self, from: NaiveDateTime, to: NaiveDateTime) -> Vec<f64> {
        self.cheaper_minutes.get(from, to)
    }

    pub fn price_profile(&self, from: NaiveDateTime, to: NaiveDateTime) -> Vec<f64> {
        self.price_profile.get(from, to)
    }
}
