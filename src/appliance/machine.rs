//! # Machine appliances
//!
//! Dishwashers and washing machines run a fixed power program once started.
//! The household decides each day whether the machine runs at all, after
//! which time it may start and by when it must be done; the policy only
//! chooses the starting minute inside that window.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rand::rngs::StdRng;
use rand::Rng;

use crate::error::SimError;
use crate::profile::Profile;
use crate::statistics::appliance::MachineStatistics;
use crate::utils::{midnights_between, minute_of_day, one_day, MINUTES_PER_DAY};

/// A scheduled run: the allowed window plus which of the class's power
/// programs this run uses.
#[derive(Debug, Clone, Copy)]
struct MachineUsage {
    start_after: NaiveTime,
    finish_by: NaiveTime,
    profile_index: usize,
}

#[derive(Debug)]
pub struct Machine {
    stats: Arc<MachineStatistics>,
    /// `None` on days the machine is not used at all.
    usages: HashMap<NaiveDate, Option<MachineUsage>>,
}

impl Machine {
    pub fn new(stats: Arc<MachineStatistics>) -> Self {
        Self {
            stats,
            usages: HashMap::new(),
        }
    }

    pub fn generate_usage(
        &mut self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        rng: &mut StdRng,
    ) -> Result<()> {
        for midnight in midnights_between(from, to) {
            let date = midnight.date();
            if self.usages.contains_key(&date) {
                continue;
            }

            let usage = if rng.gen::<f64>() < self.stats.usage_probability(date)? {
                Some(MachineUsage {
                    start_after: self.stats.random_start_after(rng),
                    finish_by: self.stats.random_finish_by(rng),
                    profile_index: self.stats.random_usage_profile(rng),
                })
            } else {
                None
            };
            self.usages.insert(date, usage);
        }
        Ok(())
    }

    fn usage(&self, date: NaiveDate) -> Result<Option<MachineUsage>> {
        self.usages
            .get(&date)
            .copied()
            .ok_or_else(|| SimError::missing(&self.stats.name, date).into())
    }

    /// The run starts wherever the program is cheapest to execute.
    pub fn calculate_smart_demand(
        &self,
        prices: &Profile,
        demand: &mut Profile,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<()> {
        for midnight in midnights_between(from, to) {
            let mut power = vec![0.0; 2 * MINUTES_PER_DAY as usize];

            if let Some(usage) = self.usage(midnight.date())? {
                let price_window = prices.get(midnight, midnight + one_day() * 2);
                let profile = &self.stats.usage_profiles[usage.profile_index];
                let runtime = profile.len();

                let start_after_slot = minute_of_day(usage.start_after) as usize;
                let finish_by_slot =
                    (MINUTES_PER_DAY + minute_of_day(usage.finish_by)) as usize;

                let mut cheapest_slot = start_after_slot;
                if finish_by_slot - start_after_slot > runtime {
                    let mut cheapest_price = f64::INFINITY;
                    for start in start_after_slot..finish_by_slot - runtime {
                        let cost: f64 = profile
                            .iter()
                            .zip(&price_window[start..start + runtime])
                            .map(|(kw, price)| kw * price)
                            .sum();
                        if cost < cheapest_price {
                            cheapest_slot = start;
                            cheapest_price = cost;
                        }
                    }
                }

                paste_program(&mut power, cheapest_slot, profile);
            }

            demand.add(midnight, &power);
        }
        Ok(())
    }

    /// The run starts as soon as the window opens.
    pub fn calculate_uncontrolled_demand(
        &self,
        demand: &mut Profile,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<()> {
        for midnight in midnights_between(from, to) {
            let mut power = vec![0.0; 2 * MINUTES_PER_DAY as usize];

            if let Some(usage) = self.usage(midnight.date())? {
                let profile = &self.stats.usage_profiles[usage.profile_index];
                let start_after_slot = minute_of_day(usage.start_after) as usize;
                paste_program(&mut power, start_after_slot, profile);
            }

            demand.add(midnight, &power);
        }
        Ok(())
    }

    /// The run sits in the middle of the allowed window.
    pub fn calculate_spread_out_demand(
        &self,
        demand: &mut Profile,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<()> {
        for midnight in midnights_between(from, to) {
            let mut power = vec![0.0; 2 * MINUTES_PER_DAY as usize];

            if let Some(usage) = self.usage(midnight.date())? {
                let profile = &self.stats.usage_profiles[usage.profile_index];
                let runtime = profile.len();
                let start_after_slot = minute_of_day(usage.start_after) as usize;
                let finish_by_slot =
                    (MINUTES_PER_DAY + minute_of_day(usage.finish_by)) as usize;

                let slack = (finish_by_slot - start_after_slot).saturating_sub(runtime);
                paste_program(&mut power, start_after_slot + slack / 2, profile);
            }

            demand.add(midnight, &power);
        }
        Ok(())
    }
}

/// Copies the power program into the buffer, clipping at the buffer end.
fn paste_program(power: &mut [f64], start: usize, profile: &[f64]) {
    for (offset, &kw) in profile.iter().enumerate() {
        if let Some(cell) = power.get_mut(start + offset) {
            *cell = kw;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rand_distr::Normal;

    fn midnight(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 7, day)
            .unwrap()
            .and_time(NaiveTime::MIN)
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn test_machine(profile: Vec<f64>, usage: Option<(NaiveTime, NaiveTime)>) -> Machine {
        let stats = Arc::new(MachineStatistics {
            name: "dishwasher".to_string(),
            start_after: Normal::new(21.0 * 60.0, 60.0).unwrap(),
            finish_by: Normal::new(5.0 * 60.0, 60.0).unwrap(),
            usage_probabilities: HashMap::new(),
            usage_profiles: vec![profile],
            average_power_needed: HashMap::new(),
        });
        let mut usages = HashMap::new();
        usages.insert(
            midnight(1).date(),
            usage.map(|(start_after, finish_by)| MachineUsage {
                start_after,
                finish_by,
                profile_index: 0,
            }),
        );
        Machine { stats, usages }
    }

    fn run_cost(power: &[f64], prices: &[f64]) -> f64 {
        power.iter().zip(prices).map(|(kw, p)| kw * p).sum()
    }

    #[test]
    fn test_smart_picks_cheapest_window_and_beats_uncontrolled() {
        // allowed 21:00 .. 05:00, cheap prices around 02:00
        let machine = test_machine(vec![2.0; 90], Some((time(21, 0), time(5, 0))));
        let mut prices = vec![2.0; 2880];
        for price in &mut prices[1560..1680] {
            *price = 0.5;
        }
        let price_profile = Profile::with_values(midnight(1), prices.clone());

        let mut smart = Profile::new();
        machine
            .calculate_smart_demand(&price_profile, &mut smart, midnight(1), midnight(2))
            .unwrap();
        let smart_power = smart.get(midnight(1), midnight(3));

        let mut uncontrolled = Profile::new();
        machine
            .calculate_uncontrolled_demand(&mut uncontrolled, midnight(1), midnight(2))
            .unwrap();
        let uncontrolled_power = uncontrolled.get(midnight(1), midnight(3));

        // the smart run lands inside the cheap region
        assert!((smart_power[1560] - 2.0).abs() < 1e-12);
        assert!(smart_power[1560..1650].iter().all(|&kw| kw == 2.0));

        // the uncontrolled run starts right at 21:00
        assert!(uncontrolled_power[1260..1350].iter().all(|&kw| kw == 2.0));

        assert!(
            run_cost(&smart_power, &prices) <= run_cost(&uncontrolled_power, &prices),
            "smart must never cost more than uncontrolled"
        );

        // both run the full program exactly once
        assert_eq!(smart_power.iter().filter(|&&kw| kw > 0.0).count(), 90);
        assert_eq!(uncontrolled_power.iter().filter(|&&kw| kw > 0.0).count(), 90);
    }

    #[test]
    fn test_smart_tie_breaks_to_earliest_start() {
        let machine = test_machine(vec![1.0; 60], Some((time(22, 0), time(4, 0))));
        let price_profile = Profile::with_values(midnight(1), vec![1.0; 2880]);

        let mut smart = Profile::new();
        machine
            .calculate_smart_demand(&price_profile, &mut smart, midnight(1), midnight(2))
            .unwrap();
        let power = smart.get(midnight(1), midnight(3));

        // flat prices: the earliest possible start wins
        assert!(power[1320..1380].iter().all(|&kw| kw == 1.0));
        assert!(power[..1320].iter().all(|&kw| kw == 0.0));
        assert!(power[1380..].iter().all(|&kw| kw == 0.0));
    }

    #[test]
    fn test_spread_out_centers_the_run() {
        let machine = test_machine(vec![1.5; 100], Some((time(21, 0), time(5, 0))));
        let mut demand = Profile::new();
        machine
            .calculate_spread_out_demand(&mut demand, midnight(1), midnight(2))
            .unwrap();
        let power = demand.get(midnight(1), midnight(3));

        // window is [1260, 1740), runtime 100 -> start at 1260 + 380/2
        let expected_start = 1260 + (1740 - 1260 - 100) / 2;
        assert!(power[expected_start..expected_start + 100]
            .iter()
            .all(|&kw| kw == 1.5));
        assert!(power[..expected_start].iter().all(|&kw| kw == 0.0));
    }

    #[test]
    fn test_unused_day_contributes_nothing() {
        let machine = test_machine(vec![2.0; 90], None);
        let price_profile = Profile::with_values(midnight(1), vec![1.0; 2880]);

        let mut smart = Profile::new();
        machine
            .calculate_smart_demand(&price_profile, &mut smart, midnight(1), midnight(2))
            .unwrap();
        assert!(smart.get(midnight(1), midnight(3)).iter().all(|&kw| kw == 0.0));
    }

    #[test]
    fn test_window_too_short_runs_at_start_anyway() {
        // runtime 120 but only 60 minutes of window
        let machine = test_machine(vec![1.0; 120], Some((time(23, 0), time(0, 0))));
        let mut demand = Profile::new();
        machine
            .calculate_uncontrolled_demand(&mut demand, midnight(1), midnight(2))
            .unwrap();
        let power = demand.get(midnight(1), midnight(3));
        assert!(power[1380..1500].iter().all(|&kw| kw == 1.0));
    }
}
