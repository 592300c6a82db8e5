//! # Time and sampling helpers
//!
//! Small functions used all over the simulator: minute arithmetic on
//! `chrono` types, per-day interval decomposition, weighted random choice,
//! and the cosine interpolation used for smooth curve joins.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rand::rngs::StdRng;
use rand::Rng;

/// Minutes in one simulated day.
pub const MINUTES_PER_DAY: i64 = 24 * 60;

pub fn one_day() -> Duration {
    Duration::days(1)
}

pub fn half_day() -> Duration {
    Duration::hours(12)
}

/// Counts whole minutes in a duration.
pub fn minutes_in(d: Duration) -> i64 {
    d.num_minutes()
}

/// Counts the minutes between two datetimes (negative if `end` < `start`).
pub fn minutes_between(start: NaiveDateTime, end: NaiveDateTime) -> i64 {
    minutes_in(end - start)
}

/// Midnight of the calendar date `dt` falls on.
pub fn midnight_of(dt: NaiveDateTime) -> NaiveDateTime {
    dt.date().and_time(NaiveTime::MIN)
}

/// Minute-of-day of a time value.
pub fn minute_of_day(t: NaiveTime) -> i64 {
    i64::from(t.hour()) * 60 + i64::from(t.minute())
}

/// Time value for a minute-of-day in `[0, 1440)`.
pub fn time_from_minute_of_day(minute: i64) -> NaiveTime {
    NaiveTime::from_hms_opt((minute / 60) as u32, (minute % 60) as u32, 0)
        .expect("minute of day in range")
}

/// All midnights in `[start, end)`, including `start` itself when it is one.
pub fn midnights_between(start: NaiveDateTime, end: NaiveDateTime) -> Vec<NaiveDateTime> {
    let mut midnights = Vec::new();
    if start.time() == NaiveTime::MIN {
        midnights.push(start);
    }
    let mut current = midnight_of(start) + one_day();
    while current < end {
        midnights.push(current);
        current += one_day();
    }
    midnights
}

/// The calendar days touched by `[start, end)`, each with the fraction of
/// that day covered by the interval.
pub fn day_portions_between(start: NaiveDateTime, end: NaiveDateTime) -> Vec<(f64, NaiveDate)> {
    const DAY_SECONDS: f64 = 24.0 * 60.0 * 60.0;
    if start >= end {
        return Vec::new();
    }
    if start.date() == end.date() {
        return vec![((end - start).num_seconds() as f64 / DAY_SECONDS, start.date())];
    }

    let mut portions = Vec::new();
    let mut current = start;
    let mut next_midnight = midnight_of(start) + one_day();
    while next_midnight <= end {
        portions.push((
            (next_midnight - current).num_seconds() as f64 / DAY_SECONDS,
            current.date(),
        ));
        current = next_midnight;
        next_midnight = current + one_day();
    }
    if current < end {
        portions.push(((end - current).num_seconds() as f64 / DAY_SECONDS, current.date()));
    }
    portions
}

/// Picks one index with probability proportional to its weight.
///
/// Falls back to a uniform draw when no weight is positive, so degenerate
/// probability windows cannot stall the caller.
pub fn random_with_relative_probs(weights: &[f64], rng: &mut StdRng) -> usize {
    let total: f64 = weights.iter().filter(|&&w| w > 0.0).sum();
    if !(total > 0.0) {
        return rng.gen_range(0..weights.len());
    }
    let mut x = rng.gen::<f64>() * total;
    for (i, &w) in weights.iter().enumerate() {
        if w > 0.0 {
            x -= w;
            if x < 0.0 {
                return i;
            }
        }
    }
    weights.len() - 1
}

/// Picks `count` distinct indices, weighted, without replacement.
///
/// Efraimidis-Spirakis exponential keys: each positive-weight index gets the
/// key `ln(u) / w` and the `count` largest keys win. Zero-weight indices are
/// never selected; if fewer positive weights than `count` exist, all of them
/// are returned.
pub fn sample_distinct_weighted(weights: &[f64], count: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut keyed: Vec<(f64, usize)> = weights
        .iter()
        .enumerate()
        .filter(|&(_, &w)| w > 0.0)
        .map(|(i, &w)| (rng.gen::<f64>().ln() / w, i))
        .collect();
    keyed.sort_by(|a, b| b.0.total_cmp(&a.0));
    keyed.truncate(count);
    keyed.into_iter().map(|(_, i)| i).collect()
}

/// Half-cosine ramp of length `len`: index `k` maps to `(cos(pi*k/len)+1)/2`,
/// running from 1.0 down towards (but not reaching) 0.0.
pub fn cosine_ramp(len: usize) -> impl Iterator<Item = f64> {
    (0..len).map(move |k| (f64::cos(std::f64::consts::PI * k as f64 / len as f64) + 1.0) / 2.0)
}

/// Cosine interpolation through `(xs[i], ys[i])` anchor points, evaluated at
/// every integer from `xs[0]` to `xs[last]` inclusive.
pub fn cosine_interpolation(xs: &[usize], ys: &[f64]) -> Vec<f64> {
    if xs.is_empty() {
        return Vec::new();
    }
    let mut res = Vec::with_capacity(xs[xs.len() - 1] - xs[0] + 1);
    for i in 0..xs.len() - 1 {
        let (y1, y2) = (ys[i], ys[i + 1]);
        for ratio in cosine_ramp(xs[i + 1] - xs[i]) {
            res.push(y1 * ratio + y2 * (1.0 - ratio));
        }
    }
    res.push(ys[ys.len() - 1]);
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_minutes_between() {
        assert_eq!(minutes_between(dt(2018, 7, 1, 0, 0), dt(2018, 7, 2, 0, 0)), 1440);
        assert_eq!(minutes_between(dt(2018, 7, 1, 12, 30), dt(2018, 7, 1, 12, 0)), -30);
    }

    #[test]
    fn test_midnights_include_aligned_start() {
        let mids = midnights_between(dt(2018, 7, 1, 0, 0), dt(2018, 7, 3, 0, 0));
        assert_eq!(mids, vec![dt(2018, 7, 1, 0, 0), dt(2018, 7, 2, 0, 0)]);

        let mids = midnights_between(dt(2018, 7, 1, 6, 0), dt(2018, 7, 3, 0, 0));
        assert_eq!(mids, vec![dt(2018, 7, 2, 0, 0)]);
    }

    #[test]
    fn test_day_portions_sum_to_interval() {
        let portions = day_portions_between(dt(2018, 7, 1, 18, 0), dt(2018, 7, 3, 6, 0));
        assert_eq!(portions.len(), 3);
        assert!((portions[0].0 - 0.25).abs() < 1e-12);
        assert!((portions[1].0 - 1.0).abs() < 1e-12);
        assert!((portions[2].0 - 0.25).abs() < 1e-12);
        assert_eq!(portions[1].1, NaiveDate::from_ymd_opt(2018, 7, 2).unwrap());
    }

    #[test]
    fn test_weighted_choice_respects_zero_weights() {
        let mut rng = StdRng::seed_from_u64(42);
        let weights = [0.0, 1.0, 0.0, 3.0];
        for _ in 0..200 {
            let i = random_with_relative_probs(&weights, &mut rng);
            assert!(i == 1 || i == 3);
        }
    }

    #[test]
    fn test_sample_distinct_weighted() {
        let mut rng = StdRng::seed_from_u64(42);
        let mut weights = vec![0.0; 100];
        for i in 40..60 {
            weights[i] = 1.0;
        }
        let picked = sample_distinct_weighted(&weights, 10, &mut rng);
        assert_eq!(picked.len(), 10);
        let mut sorted = picked.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 10, "indices must be distinct");
        assert!(picked.iter().all(|&i| (40..60).contains(&i)));
    }

    #[test]
    fn test_cosine_interpolation_hits_anchors() {
        let xs = [0usize, 4, 10];
        let ys = [1.0, 3.0, 2.0];
        let interp = cosine_interpolation(&xs, &ys);
        assert_eq!(interp.len(), 11);
        assert!((interp[0] - 1.0).abs() < 1e-12);
        assert!((interp[4] - 3.0).abs() < 1e-12);
        assert!((interp[10] - 2.0).abs() < 1e-12);
        // halfway through a segment the blend is the midpoint
        assert!((interp[2] - 2.0).abs() < 1e-12);
    }
}
