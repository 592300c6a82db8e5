//! # Battery appliances (electric cars)
//!
//! A car disconnects from the charger in the morning, returns in the
//! evening with some charge missing, and must be full again by the next
//! disconnection. Each simulated day therefore spans a two-day window from
//! the day's midnight: connection happens on the first day, disconnection
//! on the second.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rand::rngs::StdRng;

use crate::error::SimError;
use crate::profile::Profile;
use crate::statistics::appliance::BatteryStatistics;
use crate::utils::{midnights_between, minute_of_day, one_day, MINUTES_PER_DAY};

/// One day's worth of car usage: when it leaves, when it comes back, and
/// how much energy the driving took.
#[derive(Debug, Clone, Copy)]
struct BatteryUsage {
    disconnect: NaiveTime,
    connect: NaiveTime,
    charge_needed: f64,
}

#[derive(Debug)]
pub struct Battery {
    stats: Arc<BatteryStatistics>,
    charging_power: f64,
    usages: HashMap<NaiveDate, BatteryUsage>,
}

impl Battery {
    pub fn random(stats: Arc<BatteryStatistics>, rng: &mut StdRng) -> Self {
        let charging_power = stats.random_charging_power(rng);
        Self {
            stats,
            charging_power,
            usages: HashMap::new(),
        }
    }

    /// Fills in usage records for every date in `[from, to + 1 day)`. The
    /// extra day is needed because planning a day's charging requires the
    /// next day's disconnection time.
    pub fn generate_usage(
        &mut self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        rng: &mut StdRng,
    ) -> Result<()> {
        for midnight in midnights_between(from, to + one_day()) {
            let date = midnight.date();
            if self.usages.contains_key(&date) {
                continue;
            }

            let (disconnect, connect) = self.stats.random_usage_interval(date, rng);
            // unknown endpoints become the widest possible charging window
            let disconnect = disconnect.unwrap_or_else(|| {
                NaiveTime::from_hms_opt(23, 59, 0).expect("static time")
            });
            let connect = connect.unwrap_or(NaiveTime::MIN);
            let charge_needed = self.stats.random_needed_charge(date, rng)?;

            self.usages.insert(
                date,
                BatteryUsage {
                    disconnect,
                    connect,
                    charge_needed,
                },
            );
        }
        Ok(())
    }

    fn usage(&self, date: NaiveDate) -> Result<BatteryUsage> {
        self.usages
            .get(&date)
            .copied()
            .ok_or_else(|| SimError::missing(&self.stats.name, date).into())
    }

    /// Charging happens in the cheapest minutes of the connection window.
    pub fn calculate_smart_demand(
        &self,
        prices: &Profile,
        demand: &mut Profile,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<()> {
        for midnight in midnights_between(from, to) {
            let date = midnight.date();
            let mut power = vec![0.0; 2 * MINUTES_PER_DAY as usize];

            let today = self.usage(date)?;
            let tomorrow = self.usage(date + one_day())?;

            let charge_per_slot = self.charging_power / 60.0;
            let slots_needed = (today.charge_needed / charge_per_slot).ceil() as usize;

            if slots_needed > 0 {
                let connect_slot = minute_of_day(today.connect) as usize;
                let disconnect_slot =
                    (MINUTES_PER_DAY + minute_of_day(tomorrow.disconnect)) as usize;

                if disconnect_slot - connect_slot <= slots_needed {
                    // not enough time to fully charge; unmet demand is dropped
                    for slot in &mut power[connect_slot..disconnect_slot] {
                        *slot = self.charging_power;
                    }
                } else {
                    let price_window = prices.get(midnight, midnight + one_day() * 2);
                    let mut order: Vec<usize> = (connect_slot..disconnect_slot).collect();
                    order.sort_by(|&a, &b| price_window[a].total_cmp(&price_window[b]));

                    let chosen = &order[..slots_needed];
                    for &slot in &chosen[..slots_needed - 1] {
                        power[slot] = self.charging_power;
                    }
                    // the most expensive chosen slot only tops up the rest
                    let top_up = today.charge_needed - charge_per_slot * (slots_needed - 1) as f64;
                    power[chosen[slots_needed - 1]] = top_up * 60.0;
                }
            }

            demand.add(midnight, &power);
        }
        Ok(())
    }

    /// Charging starts the moment the car is plugged in.
    pub fn calculate_uncontrolled_demand(
        &self,
        demand: &mut Profile,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<()> {
        for midnight in midnights_between(from, to) {
            let date = midnight.date();
            let mut power = vec![0.0; 2 * MINUTES_PER_DAY as usize];

            let today = self.usage(date)?;
            let tomorrow = self.usage(date + one_day())?;

            let charge_per_slot = self.charging_power / 60.0;
            let slots_needed = (today.charge_needed / charge_per_slot).ceil() as usize;

            if slots_needed > 0 {
                let connect_slot = minute_of_day(today.connect) as usize;
                let disconnect_slot =
                    (MINUTES_PER_DAY + minute_of_day(tomorrow.disconnect)) as usize;

                if disconnect_slot - connect_slot < slots_needed {
                    for slot in &mut power[connect_slot..disconnect_slot] {
                        *slot = self.charging_power;
                    }
                } else {
                    for slot in &mut power[connect_slot..connect_slot + slots_needed - 1] {
                        *slot = self.charging_power;
                    }
                    let top_up = today.charge_needed - charge_per_slot * (slots_needed - 1) as f64;
                    power[connect_slot + slots_needed] = top_up * 60.0;
                }
            }

            demand.add(midnight, &power);
        }
        Ok(())
    }

    /// Constant power over the whole connection window.
    pub fn calculate_spread_out_demand(
        &self,
        demand: &mut Profile,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<()> {
        for midnight in midnights_between(from, to) {
            let date = midnight.date();
            let mut power = vec![0.0; 2 * MINUTES_PER_DAY as usize];

            let today = self.usage(date)?;
            let tomorrow = self.usage(date + one_day())?;

            let charge_per_slot = self.charging_power / 60.0;
            let slots_needed = (today.charge_needed / charge_per_slot).ceil() as usize;

            if slots_needed > 0 {
                let connect_slot = minute_of_day(today.connect) as usize;
                let disconnect_slot =
                    (MINUTES_PER_DAY + minute_of_day(tomorrow.disconnect)) as usize;

                let level = if disconnect_slot - connect_slot < slots_needed {
                    self.charging_power
                } else {
                    today.charge_needed / ((disconnect_slot - connect_slot) as f64 / 60.0)
                };
                for slot in &mut power[connect_slot..disconnect_slot] {
                    *slot = level;
                }
            }

            demand.add(midnight, &power);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn midnight(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 7, day)
            .unwrap()
            .and_time(NaiveTime::MIN)
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn test_stats() -> Arc<BatteryStatistics> {
        Arc::new(BatteryStatistics {
            name: "car1".to_string(),
            charging_powers: vec![7.2],
            usage_probabilities: HashMap::new(),
            needed_charges: HashMap::new(),
            average_needed_charge: HashMap::new(),
            usage_intervals: HashMap::new(),
            availability_profile: Profile::new(),
        })
    }

    /// A car connected 18:00 until 23:59 the next day, needing 14.4 kWh at
    /// 7.2 kW, with cheap prices exactly on minutes 1080..=1199.
    fn test_battery(charge_needed: f64) -> Battery {
        let mut usages = HashMap::new();
        usages.insert(
            midnight(1).date(),
            BatteryUsage {
                disconnect: time(8, 0),
                connect: time(18, 0),
                charge_needed,
            },
        );
        usages.insert(
            midnight(2).date(),
            BatteryUsage {
                disconnect: time(23, 59),
                connect: NaiveTime::MIN,
                charge_needed: 0.0,
            },
        );
        Battery {
            stats: test_stats(),
            charging_power: 7.2,
            usages,
        }
    }

    fn cheap_evening_prices() -> Profile {
        let mut prices = vec![2.0; 2880];
        for price in &mut prices[1080..1200] {
            *price = 1.0;
        }
        Profile::with_values(midnight(1), prices)
    }

    #[test]
    fn test_smart_charges_in_cheapest_slots() {
        let battery = test_battery(14.4);
        let prices = cheap_evening_prices();
        let mut demand = Profile::new();
        battery
            .calculate_smart_demand(&prices, &mut demand, midnight(1), midnight(2))
            .unwrap();

        let power = demand.get(midnight(1), midnight(3));
        // slots_needed = ceil(14.4 / 0.12) = 120, exactly the cheap window
        for minute in 1080..1200 {
            assert!((power[minute] - 7.2).abs() < 1e-9, "minute {minute}");
        }
        let energy: f64 = power.iter().sum::<f64>() / 60.0;
        assert!((energy - 14.4).abs() < 1e-9);
        assert!(power[..1080].iter().all(|&p| p == 0.0));
        assert!(power[1200..].iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_smart_fractional_remainder_lands_on_last_cheap_slot() {
        // 14.34 kWh still needs 120 slots but only 0.06 kWh in the last one
        let battery = test_battery(14.34);
        let prices = cheap_evening_prices();
        let mut demand = Profile::new();
        battery
            .calculate_smart_demand(&prices, &mut demand, midnight(1), midnight(2))
            .unwrap();

        let power = demand.get(midnight(1), midnight(3));
        for minute in 1080..1199 {
            assert!((power[minute] - 7.2).abs() < 1e-9);
        }
        assert!((power[1199] - 0.06 * 60.0).abs() < 1e-9);
        let energy: f64 = power.iter().sum::<f64>() / 60.0;
        assert!((energy - 14.34).abs() < 1e-9);
    }

    #[test]
    fn test_uncontrolled_keeps_source_remainder_placement() {
        let battery = test_battery(14.4);
        let mut demand = Profile::new();
        battery
            .calculate_uncontrolled_demand(&mut demand, midnight(1), midnight(2))
            .unwrap();

        let power = demand.get(midnight(1), midnight(3));
        // full power from connection for slots_needed - 1 minutes
        for minute in 1080..1199 {
            assert!((power[minute] - 7.2).abs() < 1e-9);
        }
        // the remainder skips one slot: 1199 stays dark, 1200 tops up
        assert_eq!(power[1199], 0.0);
        assert!((power[1200] - 7.2).abs() < 1e-9);
        let energy: f64 = power.iter().sum::<f64>() / 60.0;
        assert!((energy - 14.4).abs() < 1e-9);
    }

    #[test]
    fn test_spread_out_is_constant_and_exact() {
        let battery = test_battery(14.4);
        let mut demand = Profile::new();
        battery
            .calculate_spread_out_demand(&mut demand, midnight(1), midnight(2))
            .unwrap();

        let power = demand.get(midnight(1), midnight(3));
        let interval = 1080..2879;
        let level = power[1080];
        assert!(power[interval.clone()].iter().all(|&p| (p - level).abs() < 1e-12));
        let energy: f64 = power.iter().sum::<f64>() / 60.0;
        assert!((energy - 14.4).abs() < 1e-9);
        assert_eq!(power[2879], 0.0);
    }

    #[test]
    fn test_no_charge_needed_is_all_zeros() {
        let battery = test_battery(0.0);
        let prices = cheap_evening_prices();
        let mut demand = Profile::new();
        battery
            .calculate_smart_demand(&prices, &mut demand, midnight(1), midnight(2))
            .unwrap();
        assert!(demand.get(midnight(1), midnight(3)).iter().all(|&p| p == 0.0));
    }
}
