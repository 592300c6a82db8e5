//! # Accumulator appliances
//!
//! Water heaters, fridges, air conditioning and electrical heating all
//! behave like a leaky energy store: a class-specific discharging profile
//! drains them minute by minute and the control policy decides when to top
//! them up. The smart policy solves a constrained scheduling problem: pick
//! the cheapest set of charging minutes such that the stored energy never
//! leaves `[0, capacity]`.

use std::sync::Arc;

use chrono::NaiveDateTime;
use itertools::Itertools;
use rand::rngs::StdRng;
use rand::Rng;

use crate::profile::Profile;
use crate::statistics::appliance::AccumulatorStatistics;
use crate::utils::{minutes_between, one_day};

#[derive(Debug)]
pub struct Accumulator {
    stats: Arc<AccumulatorStatistics>,
    charging_power: f64,
    capacity: f64,
    discharging_scale: f64,
    /// Realized discharge (kW per minute) for the simulated window.
    discharging_profile: Profile,
    smart_charge: f64,
    uncontrolled_charge: f64,
    spread_out_charge: f64,
    spread_out_charging: bool,
}

impl Accumulator {
    pub fn random(stats: Arc<AccumulatorStatistics>, rng: &mut StdRng) -> Self {
        let charging_power = stats.random_charging_power(rng);
        // an appliance that would fill up in under a minute breaks the
        // slot-based scheduling, so the capacity is floored just above that
        let capacity = stats
            .random_capacity(rng)
            .max(1.1 * charging_power / 60.0);
        // stronger appliances within a class also tend to discharge more
        let discharging_scale = stats.random_discharging_scale(rng)
            * (charging_power / stats.average_charging_power);

        Self {
            smart_charge: rng.gen::<f64>() * capacity,
            uncontrolled_charge: capacity,
            spread_out_charge: rng.gen::<f64>() * capacity,
            spread_out_charging: rng.gen_bool(0.5),
            stats,
            charging_power,
            capacity,
            discharging_scale,
            discharging_profile: Profile::new(),
        }
    }

    pub fn prune(&mut self, to: NaiveDateTime) {
        self.discharging_profile.prune(to);
    }

    /// Realizes the class discharging profile for this instance.
    pub fn generate_usage(&mut self, from: NaiveDateTime, to: NaiveDateTime) {
        let mut discharge = self.stats.discharging_profile.get(from, to);
        for value in &mut discharge {
            *value *= self.discharging_scale;
        }
        self.discharging_profile.set(from, &discharge);
    }

    /// Greedy minimum-cost charging under cumulative state-of-charge bounds.
    ///
    /// With `r` kWh added per charging minute and `D_k` kWh discharged by the
    /// end of minute `k`, an on-count prefix `m_k` keeps the store within its
    /// limits iff `L_k <= m_k <= U_k` where `L_k = ceil((D_k - c0) / r)` and
    /// `U_k = floor((capacity - c0 + D_k) / r)`. After closing the bounds
    /// under reachability, slots are taken cheapest-first as long as slack
    /// remains; each acceptance shifts the bounds down behind it. The window
    /// extends one day past `to` so the emitted day does not end drained.
    pub fn calculate_smart_demand(
        &mut self,
        prices: &Profile,
        demand: &mut Profile,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) {
        let end_margin = one_day();
        let wanted_slots = minutes_between(from, to).max(0) as usize;
        let total_slots = minutes_between(from, to + end_margin).max(0) as usize;
        if wanted_slots == 0 {
            return;
        }

        let price_window = prices.get(from, to + end_margin);
        let charging_rate = self.charging_power / 60.0;
        let discharging_rates: Vec<f64> = self
            .discharging_profile
            .get(from, to + end_margin)
            .iter()
            .map(|kw| kw / 60.0)
            .collect();
        let starting_charge = self.smart_charge;

        // cumulative discharge in kWh by the end of each minute
        let mut discharged = vec![0.0; total_slots];
        let mut running = 0.0;
        for (cell, rate) in discharged.iter_mut().zip(&discharging_rates) {
            running += rate;
            *cell = running;
        }

        // integer bounds on the number of charging minutes in each prefix,
        // with a synthetic zero prepended as the algorithm's starting point
        let mut lower = vec![0_i64; total_slots + 1];
        let mut upper = vec![0_i64; total_slots + 1];
        for k in 0..total_slots {
            lower[k + 1] = (((-starting_charge) + discharged[k]) / charging_rate).ceil().max(0.0)
                as i64;
            upper[k + 1] = (((self.capacity - starting_charge + discharged[k]) / charging_rate)
                .floor())
            .min(total_slots as f64) as i64;
        }

        // close the bounds under what is actually reachable:
        // counts never decrease along the window
        for k in 1..total_slots {
            if lower[k + 1] < lower[k] {
                lower[k + 1] = lower[k];
            }
            if upper[k + 1] < upper[k] {
                upper[k + 1] = upper[k];
            }
        }
        // each minute adds at most one to the count
        for k in (1..total_slots).rev() {
            if lower[k] < lower[k + 1] - 1 {
                lower[k] = lower[k + 1] - 1;
            }
            if upper[k] < upper[k + 1] - 1 {
                upper[k] = upper[k + 1] - 1;
            }
        }
        // a prefix of k minutes cannot contain more than k charging minutes
        for k in 1..=total_slots {
            if lower[k] > (k - 1) as i64 {
                lower[k] = (k - 1) as i64;
            } else {
                break;
            }
        }
        for k in 1..=total_slots {
            if upper[k] > k as i64 {
                upper[k] = k as i64;
            } else {
                break;
            }
        }

        let mut charging = vec![0.0; total_slots];
        let cheapest_order = (0..total_slots)
            .sorted_by(|&a, &b| price_window[a].total_cmp(&price_window[b]));
        for slot in cheapest_order {
            // slack must remain at the slot and the final count must still
            // be allowed to grow
            if lower[slot] < upper[slot + 1] && lower[slot] < lower[total_slots] {
                charging[slot] = 1.0;
                let lower_from = lower
                    .iter()
                    .position(|&bound| bound > lower[slot])
                    .unwrap_or(lower.len());
                for bound in &mut lower[lower_from..] {
                    *bound -= 1;
                }
                let upper_target = upper[slot + 1];
                let upper_from = upper
                    .iter()
                    .position(|&bound| bound == upper_target)
                    .unwrap_or(upper.len());
                for bound in &mut upper[upper_from..] {
                    *bound -= 1;
                }
            }
        }

        let charged: f64 = charging[..wanted_slots].iter().sum::<f64>() * charging_rate;
        self.smart_charge = starting_charge - discharged[wanted_slots - 1] + charged;

        let power: Vec<f64> = charging[..wanted_slots]
            .iter()
            .map(|&on| on * self.charging_power)
            .collect();
        demand.set(from, &power);
    }

    /// Tops up whenever there is room for a full charging minute.
    pub fn calculate_uncontrolled_demand(
        &mut self,
        demand: &mut Profile,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) {
        let total_slots = minutes_between(from, to).max(0) as usize;
        let charging_rate = self.charging_power / 60.0;
        let discharging_rates = self.discharging_profile.get(from, to);

        let mut charge = self.uncontrolled_charge;
        let mut power = vec![0.0; total_slots];
        for slot in 0..total_slots {
            charge -= discharging_rates[slot] / 60.0;
            if charge + charging_rate < self.capacity {
                charge += charging_rate;
                power[slot] = self.charging_power;
            }
        }

        self.uncontrolled_charge = charge;
        demand.set(from, &power);
    }

    /// Thermostat behavior: charge to full, coast down to empty, repeat.
    pub fn calculate_spread_out_demand(
        &mut self,
        demand: &mut Profile,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) {
        let total_slots = minutes_between(from, to).max(0) as usize;
        let charging_rate = self.charging_power / 60.0;
        let discharging_rates = self.discharging_profile.get(from, to);

        let mut charge = self.spread_out_charge;
        let mut charging = self.spread_out_charging;
        let mut power = vec![0.0; total_slots];
        for slot in 0..total_slots {
            charge -= discharging_rates[slot] / 60.0;
            if charging {
                if charge + charging_rate > self.capacity {
                    charging = false;
                }
            } else if charge <= 0.0 {
                charging = true;
            }

            if charging {
                charge += charging_rate;
                power[slot] = self.charging_power;
            }
        }

        self.spread_out_charge = charge;
        self.spread_out_charging = charging;
        demand.set(from, &power);
    }
}
