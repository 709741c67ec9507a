//! Maps a live reading onto the 0..=8 bar of the matrix.
//!
//! The reference for the bar is the historical extreme in the direction of
//! the reading, so the bar reads "how close to the best we have seen".

use crate::prelude::*;

pub const MAX_LEVEL: u8 = 8;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelMapper {
    pub positive: Rgb,
    pub negative: Rgb,
    /// Floor applied to any non-zero reading in the measured direction.
    pub min_level: u8,
}

impl Default for LevelMapper {
    fn default() -> Self {
        Self {
            positive: Rgb::GREEN,
            negative: Rgb::RED,
            min_level: 1,
        }
    }
}

impl LevelMapper {
    pub fn new(min_level: u8) -> Self {
        Self {
            min_level: min_level.min(MAX_LEVEL),
            ..Self::default()
        }
    }

    pub fn level(&self, current: f64, history: &[f64]) -> u8 {
        if history.is_empty() {
            return if current > 0.0 { MAX_LEVEL } else { 0 };
        }

        let reference = if current >= 0.0 {
            history.iter().copied().filter(|v| *v >= 0.0).fold(0.0, f64::max)
        } else {
            history.iter().copied().filter(|v| *v < 0.0).fold(0.0, f64::min)
        };

        if reference == 0.0 {
            return 0;
        }

        let scaled = (current.abs() / reference.abs() * MAX_LEVEL as f64).round_ties_even();
        let level = scaled.clamp(0.0, MAX_LEVEL as f64) as u8;

        if current != 0.0 {
            level.max(self.min_level)
        } else {
            level
        }
    }

    /// Red through yellow to green as `current` approaches the historical peak.
    pub fn color(&self, current: f64, history: &[f64]) -> Rgb {
        if history.is_empty() {
            return if current > 0.0 { self.positive } else { self.negative };
        }

        let peak = history.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if peak <= 0.0 {
            return self.negative;
        }

        gradient((current / peak).clamp(0.0, 1.0))
    }
}

/// `ratio` in [0, 1]; 0 is red, 0.5 yellow, 1 green.
pub fn gradient(ratio: f64) -> Rgb {
    if ratio < 0.5 {
        Rgb(255, (510.0 * ratio) as u8, 0)
    } else {
        Rgb((510.0 * (1.0 - ratio)) as u8, 255, 0)
    }
}

/// Grid flow colour: blue while importing or idle, red when exporting.
pub fn grid_color(grid_kw: f64) -> Rgb {
    if grid_kw >= 0.0 {
        Rgb::BLUE
    } else {
        Rgb::RED
    }
}
