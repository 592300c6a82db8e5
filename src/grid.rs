//! # The smart grid
//!
//! The grid side of the daily loop: predict the base demand (everything
//! except the simulated households), derive a smooth target curve for the
//! households to fill, convert it into per-minute cheap-price probabilities
//! and hand those to the connections. After the houses have calculated a
//! day, the grid sums their realized demand curves.

use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDateTime;
use rand::rngs::StdRng;
use rand::Rng;
use tracing::debug;

use crate::connection::Connection;
use crate::house::House;
use crate::profile::Profile;
use crate::signal::{find_peaks, interpolate_anchors};
use crate::statistics::{StatisticsBundle, CAR_CLASSES};
use crate::utils::{
    cosine_interpolation, day_portions_between, half_day, minutes_between, one_day,
};

/// Peaks in demand curves are at least this far apart (daily rhythm).
const PEAK_DISTANCE: usize = 18 * 60;
/// And at least this wide, to skip measurement spikes.
const PEAK_WIDTH: usize = 10;

#[derive(Debug)]
pub struct Grid {
    /// Midnight following the last fully calculated day.
    current_dt: NaiveDateTime,
    stats: Arc<StatisticsBundle>,
    pub predicted_base_demand: Profile,
    pub target_demand: Profile,
    pub cheap_price_ratio: Profile,
    pub smart_demand: Profile,
    pub uncontrolled_demand: Profile,
    pub spread_out_demand: Profile,
    connections: Vec<Connection>,
}

impl Grid {
    pub fn new(stats: Arc<StatisticsBundle>) -> Self {
        Self {
            current_dt: NaiveDateTime::default(),
            stats,
            predicted_base_demand: Profile::new(),
            target_demand: Profile::new(),
            cheap_price_ratio: Profile::new(),
            smart_demand: Profile::new(),
            uncontrolled_demand: Profile::new(),
            spread_out_demand: Profile::new(),
            connections: Vec::new(),
        }
    }

    pub fn connect_house(&mut self, house: House) {
        self.connections.push(Connection::new(house, self.stats.price));
    }

    pub fn connections_mut(&mut self) -> &mut [Connection] {
        &mut self.connections
    }

    /// Prepares predictions, targets and price ratios far enough ahead that
    /// the first day's appliances already see two days of prices.
    pub fn set_up(&mut self, dt: NaiveDateTime, rng: &mut StdRng) -> Result<()> {
        self.current_dt = dt;

        self.predict_base_demand(dt - one_day() * 3, dt + one_day() * 4);
        self.calculate_target_demand(dt - one_day() * 2, dt + one_day() * 3 + half_day(), rng)?;
        self.calculate_price_ratio(dt - one_day(), dt + one_day() * 2 + half_day())?;
        self.distribute_price_ratios(dt - one_day(), dt + one_day() * 2 + half_day());

        for connection in &mut self.connections {
            connection.set_up(dt, rng)?;
        }
        Ok(())
    }

    /// Advances one day: collects the day the houses just finished, then
    /// extends predictions, targets and price ratios one more day ahead.
    pub fn tick(&mut self, rng: &mut StdRng) -> Result<()> {
        self.current_dt += one_day();
        let cdt = self.current_dt;

        self.collect_demands(cdt - one_day(), cdt);

        self.predict_base_demand(cdt + one_day() * 3, cdt + one_day() * 4);
        self.calculate_target_demand(
            cdt + one_day() * 2 + half_day(),
            cdt + one_day() * 3 + half_day(),
            rng,
        )?;
        self.calculate_price_ratio(cdt + one_day() + half_day(), cdt + one_day() * 2 + half_day())?;
        self.distribute_price_ratios(
            cdt + one_day() + half_day(),
            cdt + one_day() * 2 + half_day(),
        );

        for connection in &mut self.connections {
            connection.tick(rng);
        }
        Ok(())
    }

    /// Grid-wide demand minus what the simulated households already draw,
    /// both scaled down to the simulated population.
    fn predict_base_demand(&mut self, from: NaiveDateTime, to: NaiveDateTime) {
        let houses = self.connections.len() as f64;
        let forecast = &self.stats.demand_forecast;
        let scale = houses / forecast.household_count;

        let demand = forecast.demand.get(from, to);
        let draw = self.stats.average_household_draw.get(from, to);
        let prediction: Vec<f64> = demand
            .iter()
            .zip(&draw)
            .map(|(total, household)| total * scale - household * houses)
            .collect();

        self.predicted_base_demand.set(from, &prediction);
    }

    /// Expected household consumption in kWh over the day portions of a
    /// window, over all appliance classes (or only cars).
    fn expected_consumption(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        cars_only: bool,
    ) -> Result<f64> {
        let stats = &self.stats;
        let houses = self.connections.len() as f64;

        let mut total = 0.0;
        for (fraction, day) in day_portions_between(from, to) {
            let mut day_consumption = 0.0;
            for index in 0..CAR_CLASSES {
                day_consumption += stats.at_least_this_many_cars[index + 1]
                    * stats.cars[index].average_needed_charge(day)?;
            }
            if !cars_only {
                day_consumption += stats.ownership.air_conditioning
                    * stats.air_conditioning.average_daily_charge(day)?;
                day_consumption += stats.ownership.electrical_heating
                    * stats.electrical_heating.average_daily_charge(day)?;
                day_consumption += stats.ownership.fridge * stats.fridge.average_daily_charge(day)?;
                day_consumption +=
                    stats.ownership.water_heater * stats.water_heater.average_daily_charge(day)?;
                day_consumption +=
                    stats.ownership.dishwasher * stats.dishwasher.average_power_needed(day)?;
                day_consumption += stats.ownership.washing_machine
                    * stats.washing_machine.average_power_needed(day)?;
            }
            total += fraction * houses * day_consumption;
        }
        Ok(total)
    }

    /// Anchor points for envelope interpolation: the peaks, extended flat to
    /// both window edges. A peakless window anchors on its own endpoints.
    fn peak_anchors(values: &[f64]) -> (Vec<usize>, Vec<f64>) {
        let peaks = find_peaks(values, PEAK_DISTANCE, PEAK_WIDTH);
        if peaks.is_empty() {
            debug!("no peaks found in a {}-minute window", values.len());
            return (
                vec![0, values.len() - 1],
                vec![values[0], values[values.len() - 1]],
            );
        }

        let mut locations = Vec::with_capacity(peaks.len() + 2);
        let mut heights = Vec::with_capacity(peaks.len() + 2);
        locations.push(0);
        heights.push(values[peaks[0]]);
        for &peak in &peaks {
            locations.push(peak);
            heights.push(values[peak]);
        }
        locations.push(values.len() - 1);
        heights.push(values[peaks[peaks.len() - 1]]);
        (locations, heights)
    }

    /// Derives the demand curve the households should follow: the gap
    /// between the base demand and its rolling-peak envelope, rescaled so it
    /// covers the households' expected consumption.
    fn calculate_target_demand(
        &mut self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        rng: &mut StdRng,
    ) -> Result<()> {
        let start_margin = one_day();
        let end_margin = half_day();
        let start_index = start_margin.num_minutes() as usize;

        // forecast noise on the expected consumption
        let expected = self.expected_consumption(from, to, false)? * (0.9 + rng.gen::<f64>() * 0.2);

        let base_demand = self.predicted_base_demand.get(from - start_margin, to + end_margin);
        let (anchor_locations, anchor_heights) = Self::peak_anchors(&base_demand);
        let smooth_demand =
            interpolate_anchors(&anchor_locations, &anchor_heights, base_demand.len());

        let mut target: Vec<f64> = smooth_demand[start_index..]
            .iter()
            .zip(&base_demand[start_index..])
            .map(|(smooth, base)| smooth - base)
            .collect();

        let interval_minutes = minutes_between(from, to).max(0) as usize;
        let integrated: f64 = target[..interval_minutes.min(target.len())].iter().sum::<f64>() / 60.0;

        if expected <= integrated {
            if integrated > 0.0 {
                let scale = expected / integrated;
                for value in &mut target {
                    *value *= scale;
                }
            }
        } else {
            let shift = (expected - integrated) / (interval_minutes as f64 / 60.0);
            for value in &mut target {
                *value += shift;
            }
        }

        for value in &mut target {
            *value = value.max(0.0);
        }

        // crossfade into the previously calculated overlap
        self.target_demand.transition(from, &target);
        Ok(())
    }

    /// Converts the target demand into the fraction of households that
    /// should see a cheap price each minute: scale by car availability,
    /// then normalize so the daily peaks land at probability 1.
    fn calculate_price_ratio(&mut self, from: NaiveDateTime, to: NaiveDateTime) -> Result<()> {
        let margin = one_day();
        let start_index = margin.num_minutes() as usize;

        let target = self.target_demand.get(from - margin, to + margin);

        // how much of the target demand belongs to cars
        let expected_cars = self.expected_consumption(from - margin, to + margin, true)?;
        let target_sum: f64 = target.iter().sum();
        let car_demand_ratio = if target_sum > 0.0 {
            expected_cars / target_sum
        } else {
            0.0
        };

        // average availability of cars that actually need charging
        let window_minutes = minutes_between(from - margin, to + margin).max(0) as usize;
        let mut cars_at_home = vec![0.0; window_minutes];
        let mut total_need_ratio = 0.0;
        for index in 0..CAR_CLASSES {
            let car = &self.stats.cars[index];
            let mut need_ratio = 0.0;
            let mut total_fraction = 0.0;
            for (fraction, day) in day_portions_between(from - margin, to + margin) {
                need_ratio += fraction * car.usage_probability(day)?;
                total_fraction += fraction;
            }
            need_ratio /= total_fraction;

            let availability = car.availability_profile.get(from - margin, to + margin);
            for (at_home, available) in cars_at_home.iter_mut().zip(&availability) {
                *at_home += need_ratio * available;
            }
            total_need_ratio += need_ratio;
        }
        if total_need_ratio > 0.0 {
            for at_home in &mut cars_at_home {
                *at_home /= total_need_ratio;
            }
        }

        // fewer cars at home means the ones present need cheaper prices
        let relative: Vec<f64> = target
            .iter()
            .zip(&cars_at_home)
            .map(|(demand, at_home)| {
                let scale = (1.0 - car_demand_ratio) + car_demand_ratio * at_home;
                if scale > 0.0 {
                    demand / scale
                } else {
                    0.0
                }
            })
            .collect();

        // normalize the daily peaks to probability 1
        let (anchor_locations, anchor_heights) = Self::peak_anchors(&relative);
        let envelope = cosine_interpolation(&anchor_locations, &anchor_heights);
        let scaled: Vec<f64> = relative
            .iter()
            .zip(&envelope)
            .map(|(demand, peak)| if *peak > 0.0 { demand / peak } else { 0.0 })
            .collect();

        self.cheap_price_ratio.transition(from, &scaled[start_index..]);
        Ok(())
    }

    fn distribute_price_ratios(&mut self, from: NaiveDateTime, to: NaiveDateTime) {
        let ratios = self.cheap_price_ratio.get(from, to);
        for connection in &mut self.connections {
            connection.set_price_ratio(from, &ratios);
        }
    }

    /// Sums the realized demand curves of all connected houses.
    fn collect_demands(&mut self, from: NaiveDateTime, to: NaiveDateTime) {
        let length = minutes_between(from, to).max(0) as usize;
        let mut smart = vec![0.0; length];
        let mut uncontrolled = vec![0.0; length];
        let mut spread_out = vec![0.0; length];
        for connection in &self.connections {
            for (total, value) in smart.iter_mut().zip(connection.smart_demand(from, to)) {
                *total += value;
            }
            for (total, value) in uncontrolled
                .iter_mut()
                .zip(connection.uncontrolled_demand(from, to))
            {
                *total += value;
            }
            for (total, value) in spread_out
                .iter_mut()
                .zip(connection.spread_out_demand(from, to))
            {
                *total += value;
            }
        }
        self.smart_demand.set(from, &smart);
        self.uncontrolled_demand.set(from, &uncontrolled);
        self.spread_out_demand.set(from, &spread_out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::statistics::fixtures::test_bundle;
    use chrono::{NaiveDate, NaiveTime};
    use rand::SeedableRng;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 7, 10)
            .unwrap()
            .and_time(NaiveTime::MIN)
    }

    fn grid_with_houses(houses: usize) -> (Grid, StdRng) {
        let stats = Arc::new(test_bundle(start().date(), 4));
        let mut rng = StdRng::seed_from_u64(42);
        let mut grid = Grid::new(stats.clone());
        for _ in 0..houses {
            grid.connect_house(House::random(&stats, &mut rng));
        }
        (grid, rng)
    }

    #[test]
    fn test_predict_base_demand_scales_with_population() {
        let (mut grid, _) = grid_with_houses(10);
        grid.predict_base_demand(start(), start() + one_day());

        let prediction = grid.predicted_base_demand.get(start(), start() + one_day());
        assert_eq!(prediction.len(), 1440);
        // fixture: load ~80 for 100 households -> ~8 for 10 houses, minus
        // 10 * 0.4 household draw
        let average = prediction.iter().sum::<f64>() / prediction.len() as f64;
        assert!(average > 2.0 && average < 6.0, "average {average}");
    }

    #[test]
    fn test_target_demand_is_nonnegative_and_covers_consumption() {
        let (mut grid, mut rng) = grid_with_houses(10);
        grid.predict_base_demand(start() - one_day() * 3, start() + one_day() * 4);
        grid.calculate_target_demand(
            start() - one_day() * 2,
            start() + one_day() * 3 + half_day(),
            &mut rng,
        )
        .unwrap();

        let target = grid
            .target_demand
            .get(start() - one_day() * 2, start() + one_day() * 3 + half_day());
        assert!(target.iter().all(|&demand| demand >= 0.0));

        // the integral must cover at least 90% of the expected consumption
        // (the noise factor bottoms out at 0.9)
        let expected = grid
            .expected_consumption(
                start() - one_day() * 2,
                start() + one_day() * 3 + half_day(),
                false,
            )
            .unwrap();
        let integrated: f64 = target.iter().sum::<f64>() / 60.0;
        assert!(
            integrated >= expected * 0.9 - 1e-6,
            "integral {integrated} vs expected {expected}"
        );
    }

    #[test]
    fn test_price_ratio_is_a_probability() {
        let (mut grid, mut rng) = grid_with_houses(10);
        grid.predict_base_demand(start() - one_day() * 3, start() + one_day() * 4);
        grid.calculate_target_demand(
            start() - one_day() * 2,
            start() + one_day() * 3 + half_day(),
            &mut rng,
        )
        .unwrap();
        grid.calculate_price_ratio(start() - one_day(), start() + one_day() * 2 + half_day())
            .unwrap();

        let ratios = grid
            .cheap_price_ratio
            .get(start() - one_day(), start() + one_day() * 2 + half_day());
        assert!(ratios.iter().all(|r| r.is_finite()));
        assert!(ratios.iter().all(|&r| r >= 0.0));
        // peaks normalize to 1; cosine blending of neighbouring peak
        // envelopes can push slightly above it between anchor points
        let max = ratios.iter().cloned().fold(0.0, f64::max);
        assert!(max > 0.5 && max < 1.5, "max ratio {max}");
    }

    #[test]
    fn test_empty_grid_stays_finite() {
        let (mut grid, mut rng) = grid_with_houses(0);
        grid.set_up(start(), &mut rng).unwrap();

        let ratios = grid
            .cheap_price_ratio
            .get(start(), start() + one_day());
        assert_eq!(ratios.len(), 1440);
        assert!(ratios.iter().all(|r| r.is_finite()));

        let prediction = grid.predicted_base_demand.get(start(), start() + one_day());
        assert!(prediction.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_tick_collects_house_demand() {
        let (mut grid, mut rng) = grid_with_houses(3);
        grid.set_up(start(), &mut rng).unwrap();

        for connection in grid.connections_mut() {
            connection.house_mut().tick(&mut rng).unwrap();
        }
        grid.tick(&mut rng).unwrap();

        let smart = grid.smart_demand.get(start(), start() + one_day());
        assert_eq!(smart.len(), 1440);
        // three houses with the fixture's appliance mix draw some power
        assert!(smart.iter().sum::<f64>() > 0.0);
    }
}
