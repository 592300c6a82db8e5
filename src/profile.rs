//! # Minute-resolution time series
//!
//! `Profile` is the workhorse container of the simulator: a dense, growable
//! sequence of `f64` values anchored at a starting timestamp, one value per
//! minute. Reads outside the stored range come back as zeros, writes extend
//! the storage, and `prune` drops history that no component needs anymore.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::SimError;
use crate::utils::{cosine_ramp, minutes_between, MINUTES_PER_DAY};

#[derive(Debug, Clone, Default)]
pub struct Profile {
    /// Timestamp of the first stored value; `None` until the first write.
    start: Option<NaiveDateTime>,
    values: Vec<f64>,
}

impl Profile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(start: NaiveDateTime, values: Vec<f64>) -> Self {
        Self {
            start: Some(start),
            values,
        }
    }

    pub fn start(&self) -> Option<NaiveDateTime> {
        self.start
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values over `[from, to)`, one per minute. Regions outside the stored
    /// range are zero-filled, so the result always has `minutes(to - from)`
    /// entries.
    pub fn get(&self, from: NaiveDateTime, to: NaiveDateTime) -> Vec<f64> {
        let len = minutes_between(from, to).max(0) as usize;
        let mut out = vec![0.0; len];
        let Some(start) = self.start else {
            return out;
        };

        let offset = minutes_between(start, from);
        let lo = offset.max(0);
        let hi = (offset + len as i64).min(self.values.len() as i64);
        if lo < hi {
            let dst = (lo - offset) as usize;
            let n = (hi - lo) as usize;
            out[dst..dst + n].copy_from_slice(&self.values[lo as usize..hi as usize]);
        }
        out
    }

    /// Overwrites the values starting at `from`, extending storage if needed.
    /// Writes never precede the anchor.
    pub fn set(&mut self, from: NaiveDateTime, values: &[f64]) {
        let Some(start) = self.start else {
            self.start = Some(from);
            self.values = values.to_vec();
            return;
        };

        let offset = minutes_between(start, from);
        debug_assert!(offset >= 0, "profile write precedes its anchor");
        let offset = offset.max(0) as usize;
        let new_len = offset + values.len();
        if new_len > self.values.len() {
            self.values.resize(new_len, 0.0);
        }
        self.values[offset..offset + values.len()].copy_from_slice(values);
    }

    /// Element-wise adds `values` starting at `from`, zero-initializing any
    /// newly created cells.
    pub fn add(&mut self, from: NaiveDateTime, values: &[f64]) {
        if self.start.is_none() {
            self.start = Some(from);
        }
        let start = self.start.expect("anchor just ensured");

        let offset = minutes_between(start, from);
        debug_assert!(offset >= 0, "profile write precedes its anchor");
        let offset = offset.max(0) as usize;
        let new_len = offset + values.len();
        if new_len > self.values.len() {
            self.values.resize(new_len, 0.0);
        }
        for (cell, v) in self.values[offset..].iter_mut().zip(values) {
            *cell += v;
        }
    }

    /// Crossfades from the currently stored tail into `values` with a cosine
    /// ramp over their overlap; past the overlap the new values win outright.
    pub fn transition(&mut self, from: NaiveDateTime, values: &[f64]) {
        let Some(start) = self.start else {
            self.set(from, values);
            return;
        };

        let offset = minutes_between(start, from).max(0) as usize;
        let overlap = self.values.len() as i64 - offset as i64;
        let new_len = offset + values.len();
        if new_len > self.values.len() {
            self.values.resize(new_len, 0.0);
        }

        if overlap <= 0 {
            // No stored tail to blend with; the gap (if any) stays zero.
            self.values[offset..].copy_from_slice(values);
            return;
        }

        let overlap = overlap as usize;
        let mut ramp = cosine_ramp(overlap);
        for (k, &new) in values.iter().enumerate() {
            let ratio = if k < overlap {
                ramp.next().expect("ramp has `overlap` entries")
            } else {
                0.0
            };
            let old = self.values[offset + k];
            self.values[offset + k] = old * ratio + new * (1.0 - ratio);
        }
    }

    /// Multiplies every stored value by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for v in &mut self.values {
            *v *= factor;
        }
    }

    /// Drops all values strictly before `to` and moves the anchor there.
    pub fn prune(&mut self, to: NaiveDateTime) {
        let Some(start) = self.start else {
            return;
        };
        if to <= start {
            return;
        }

        let index = minutes_between(start, to) as usize;
        self.start = Some(to);
        if index >= self.values.len() {
            self.values.clear();
        } else {
            self.values.drain(..index);
        }
    }

    /// Arithmetic mean of the stored values for each calendar day covered,
    /// using whatever cells exist within that day.
    pub fn daily_averages(&self) -> BTreeMap<NaiveDate, f64> {
        let mut averages = BTreeMap::new();
        let Some(start) = self.start else {
            return averages;
        };
        if self.values.is_empty() {
            return averages;
        }

        let mut date = start.date();
        let mut start_index = minutes_between(start, date.and_time(NaiveTime::MIN));
        let mut end_index = start_index + MINUTES_PER_DAY;
        while start_index < self.values.len() as i64 {
            let lo = start_index.max(0) as usize;
            let hi = end_index.min(self.values.len() as i64) as usize;
            let day_values = &self.values[lo..hi];
            averages.insert(date, day_values.iter().sum::<f64>() / day_values.len() as f64);

            date += Duration::days(1);
            start_index += MINUTES_PER_DAY;
            end_index += MINUTES_PER_DAY;
        }
        averages
    }

    /// Loads a profile from a two-column CSV (timestamp, value) with a header
    /// row. Rows must be minute-spaced and strictly ascending; the first
    /// row's timestamp becomes the anchor.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("opening profile CSV {}", path.display()))?;

        let mut start = None;
        let mut previous: Option<NaiveDateTime> = None;
        let mut values = Vec::new();
        for (row, record) in reader.records().enumerate() {
            let record =
                record.with_context(|| format!("reading {} row {}", path.display(), row + 2))?;
            let raw_ts = record
                .get(0)
                .ok_or_else(|| SimError::malformed(path, format!("row {} has no timestamp", row + 2)))?;
            let timestamp = parse_timestamp(raw_ts)
                .ok_or_else(|| SimError::malformed(path, format!("bad timestamp {raw_ts:?}")))?;
            let value: f64 = record
                .get(1)
                .ok_or_else(|| SimError::malformed(path, format!("row {} has no value", row + 2)))?
                .trim()
                .parse()
                .with_context(|| format!("parsing value in {} row {}", path.display(), row + 2))?;

            if let Some(prev) = previous {
                if timestamp - prev != Duration::minutes(1) {
                    return Err(SimError::malformed(
                        path,
                        format!("rows must be minute-spaced and ascending, got {prev} then {timestamp}"),
                    )
                    .into());
                }
            }
            if start.is_none() {
                start = Some(timestamp);
            }
            previous = Some(timestamp);
            values.push(value);
        }

        Ok(match start {
            Some(start) => Self::with_values(start, values),
            None => Self::new(),
        })
    }
}

/// Accepts the timestamp spellings that appear across the datasets.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;

    fn dt(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 7, d)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_get_zero_pads_out_of_range() {
        let profile = Profile::with_values(dt(1, 12, 0), vec![1.0, 2.0, 3.0]);

        let values = profile.get(dt(1, 11, 58), dt(1, 12, 5));
        assert_eq!(values, vec![0.0, 0.0, 1.0, 2.0, 3.0, 0.0, 0.0]);

        // entirely outside the stored range
        assert_eq!(profile.get(dt(2, 0, 0), dt(2, 0, 3)), vec![0.0; 3]);
        // empty profile
        assert_eq!(Profile::new().get(dt(1, 0, 0), dt(1, 0, 2)), vec![0.0; 2]);
    }

    #[test]
    fn test_get_concatenation_invariant() {
        let profile = Profile::with_values(dt(1, 12, 0), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let (t1, t2, t3) = (dt(1, 11, 57), dt(1, 12, 2), dt(1, 12, 9));

        let whole = profile.get(t1, t3);
        let mut parts = profile.get(t1, t2);
        parts.extend(profile.get(t2, t3));
        assert_eq!(whole, parts);
    }

    #[test]
    fn test_set_and_add_extend_storage() {
        let mut profile = Profile::new();
        profile.set(dt(1, 0, 0), &[1.0, 1.0]);
        profile.add(dt(1, 0, 1), &[0.5, 0.5, 0.5]);

        assert_eq!(profile.get(dt(1, 0, 0), dt(1, 0, 4)), vec![1.0, 1.5, 0.5, 0.5]);
        assert_eq!(profile.start(), Some(dt(1, 0, 0)));
        assert_eq!(profile.len(), 4);
    }

    #[test]
    fn test_transition_cosine_blend() {
        let mut profile = Profile::with_values(dt(1, 0, 0), vec![1.0, 1.0, 1.0, 1.0]);
        profile.transition(dt(1, 0, 2), &[0.0, 0.0, 0.0, 0.0]);

        let values = profile.get(dt(1, 0, 0), dt(1, 0, 6));
        assert!((values[0] - 1.0).abs() < 1e-12);
        assert!((values[1] - 1.0).abs() < 1e-12);
        // overlap of 2: ratios are 1.0 and 0.5
        assert!((values[2] - 1.0).abs() < 1e-12);
        assert!((values[3] - 0.5).abs() < 1e-12);
        assert!((values[4]).abs() < 1e-12);
        assert!((values[5]).abs() < 1e-12);
    }

    #[test]
    fn test_transition_without_overlap_behaves_like_set() {
        let mut profile = Profile::with_values(dt(1, 0, 0), vec![1.0, 2.0]);
        profile.transition(dt(1, 0, 3), &[5.0, 6.0]);
        assert_eq!(profile.get(dt(1, 0, 0), dt(1, 0, 5)), vec![1.0, 2.0, 0.0, 5.0, 6.0]);
    }

    #[test]
    fn test_prune_preserves_later_reads() {
        let mut profile = Profile::with_values(dt(1, 0, 0), vec![1.0, 2.0, 3.0, 4.0]);
        let before = profile.get(dt(1, 0, 2), dt(1, 0, 6));

        profile.prune(dt(1, 0, 2));
        assert_eq!(profile.start(), Some(dt(1, 0, 2)));
        assert_eq!(profile.get(dt(1, 0, 2), dt(1, 0, 6)), before);
        assert_eq!(profile.get(dt(1, 0, 0), dt(1, 0, 2)), vec![0.0, 0.0]);

        // pruning past the end empties the profile but keeps the new anchor
        profile.prune(dt(2, 0, 0));
        assert_eq!(profile.len(), 0);
        assert_eq!(profile.start(), Some(dt(2, 0, 0)));
    }

    #[test]
    fn test_daily_averages_partial_days() {
        // starts at 23:58, so the first day has only two cells
        let mut values = vec![4.0, 6.0];
        values.extend(vec![1.0; 1440]);
        let profile = Profile::with_values(dt(1, 23, 58), values);

        let averages = profile.daily_averages();
        assert_eq!(averages.len(), 2);
        assert!((averages[&NaiveDate::from_ymd_opt(2018, 7, 1).unwrap()] - 5.0).abs() < 1e-12);
        assert!((averages[&NaiveDate::from_ymd_opt(2018, 7, 2).unwrap()] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_from_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "datetime,value").unwrap();
        writeln!(file, "2018-07-01 00:00:00,1.5").unwrap();
        writeln!(file, "2018-07-01 00:01:00,2.5").unwrap();
        writeln!(file, "2018-07-01 00:02:00,3.5").unwrap();
        file.flush().unwrap();

        let profile = Profile::from_csv(file.path()).unwrap();
        assert_eq!(profile.start(), Some(dt(1, 0, 0)));
        assert_eq!(profile.get(dt(1, 0, 0), dt(1, 0, 3)), vec![1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_from_csv_rejects_gaps() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "datetime,value").unwrap();
        writeln!(file, "2018-07-01 00:00:00,1.0").unwrap();
        writeln!(file, "2018-07-01 00:05:00,2.0").unwrap();
        file.flush().unwrap();

        assert!(Profile::from_csv(file.path()).is_err());
    }
}
