//! Night chart: one day's production spread over the columns of the matrix.

use crate::prelude::*;
use crate::level::MAX_LEVEL;
use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};

/// Reduces one day of samples to a row of bar levels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChartBucketizer {
    pub buckets: usize,
    pub day_start: u32,
    pub day_end: u32,
    /// Buckets at or above this share of the all-time peak render full.
    pub saturation: f64,
}

impl Default for ChartBucketizer {
    fn default() -> Self {
        Self {
            buckets: 8,
            day_start: 6,
            day_end: 20,
            saturation: 0.9,
        }
    }
}

impl ChartBucketizer {
    pub fn new(buckets: usize, day_start: u32, day_end: u32, saturation: f64) -> Self {
        Self {
            buckets,
            day_start,
            day_end,
            saturation,
        }
    }

    /// The date being charted: today once daylight has begun, yesterday before.
    pub fn active_day(&self, now: NaiveDateTime) -> NaiveDate {
        if now.hour() >= self.day_start {
            now.date()
        } else {
            now.date() - Duration::days(1)
        }
    }

    pub fn bucketize(&self, series: &[Sample], now: NaiveDateTime) -> Vec<u8> {
        let mut levels = vec![0; self.buckets];
        if self.buckets == 0 {
            return levels;
        }

        let day = self.active_day(now);
        let day_samples: Vec<&Sample> = series
            .iter()
            .filter(|s| s.timestamp.date() == day && s.value > 0.0)
            .collect();
        if day_samples.is_empty() {
            return levels;
        }

        let historical_max = series
            .iter()
            .map(|s| s.value)
            .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |m| m.max(v))))
            .unwrap_or(1.0);

        let Some(midnight) = day.and_hms_opt(0, 0, 0) else {
            return levels;
        };
        let window_start = midnight + Duration::hours(self.day_start as i64);
        let window_end = midnight + Duration::hours(self.day_end as i64);
        let total = (window_end - window_start).num_seconds();
        if total <= 0 {
            return levels;
        }

        let mut sums = vec![0.0; self.buckets];
        let mut counts = vec![0usize; self.buckets];
        for sample in day_samples {
            if sample.timestamp < window_start || sample.timestamp >= window_end {
                continue;
            }
            let elapsed = (sample.timestamp - window_start).num_seconds();
            let index = ((elapsed as f64 / total as f64 * self.buckets as f64) as usize).min(self.buckets - 1);
            sums[index] += sample.value;
            counts[index] += 1;
        }

        if historical_max == 0.0 {
            return levels;
        }

        for (level, (sum, count)) in levels.iter_mut().zip(sums.into_iter().zip(counts)) {
            let average = if count > 0 { sum / count as f64 } else { 0.0 };
            let ratio = average / historical_max;
            *level = if ratio >= self.saturation {
                MAX_LEVEL
            } else {
                (ratio * MAX_LEVEL as f64)
                    .round_ties_even()
                    .clamp(0.0, MAX_LEVEL as f64) as u8
            };
        }

        levels
    }
}
