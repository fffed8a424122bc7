//! Note Time Estimator
//!
//! Converts the screen row of a falling note into the milliseconds left until
//! it reaches the hit line.
//!
//! # Model
//!
//! The delay was fitted at scroll speed 10 as a degree-10 polynomial in the
//! row `y`. Other speeds scale the fitted delay by `10 / speed`. The curve is
//! only evaluated once per row when the estimator is built; lookups are a
//! bounds check and an array read.
//!
//! The fit bends back upwards past the bottom of the usual corridor, so the
//! table takes a running minimum and is non-increasing in `y` for every
//! corridor and speed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Delay polynomial at speed 10, highest degree first
const DELAY_POLY_X10: [f64; 11] = [
    6.511e-24, -2.627e-20, 4.649e-17, -4.745e-14, 3.085e-11, -1.329e-08, 3.836e-06, -0.0007447,
    0.1008, -11.66, 1370.0,
];

/// In-game note scroll speed setting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedFactor {
    /// Speed 6
    X6,
    /// Speed 8
    X8,
    /// Speed 9
    X9,
    /// Speed 10 (calibration speed)
    #[default]
    X10,
    /// Speed 11
    X11,
}

impl SpeedFactor {
    /// All supported speeds, slowest first
    pub const ALL: [SpeedFactor; 5] = [Self::X6, Self::X8, Self::X9, Self::X10, Self::X11];

    /// Numeric speed value
    pub fn value(self) -> u32 {
        match self {
            Self::X6 => 6,
            Self::X8 => 8,
            Self::X9 => 9,
            Self::X10 => 10,
            Self::X11 => 11,
        }
    }

    /// Multiplier applied to the speed-10 delay curve
    fn delay_scale(self) -> f64 {
        10.0 / self.value() as f64
    }
}

impl fmt::Display for SpeedFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.value())
    }
}

impl FromStr for SpeedFactor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches(['x', 'X']);
        match digits {
            "6" => Ok(Self::X6),
            "8" => Ok(Self::X8),
            "9" => Ok(Self::X9),
            "10" => Ok(Self::X10),
            "11" => Ok(Self::X11),
            _ => Err(format!(
                "Unknown speed: {}. Valid: x6, x8, x9, x10, x11",
                s
            )),
        }
    }
}

/// Evaluate the speed-10 delay curve at row `y` (Horner)
fn delay_at_x10(y: f64) -> f64 {
    DELAY_POLY_X10.iter().fold(0.0, |acc, c| acc * y + c)
}

/// Precomputed per-row hit delay lookup
///
/// Immutable once built; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct NoteTimeEstimator {
    speed: SpeedFactor,
    first_row: i32,
    delays_ms: Vec<i64>,
}

impl NoteTimeEstimator {
    /// Build the table for rows `check_upper_y..=check_lower_y`
    ///
    /// An inverted range yields an empty table that answers `None` for every
    /// row.
    pub fn new(speed: SpeedFactor, check_upper_y: i32, check_lower_y: i32) -> Self {
        let scale = speed.delay_scale();
        let mut delays_ms = Vec::with_capacity((check_lower_y - check_upper_y + 1).max(0) as usize);
        let mut floor = i64::MAX;
        for y in check_upper_y..=check_lower_y {
            let delay = (delay_at_x10(y as f64) * scale).max(0.0) as i64;
            floor = floor.min(delay);
            delays_ms.push(floor);
        }

        debug!(
            "Built hit delay table for speed {} over rows {}..={} ({} entries)",
            speed,
            check_upper_y,
            check_lower_y,
            delays_ms.len()
        );

        Self {
            speed,
            first_row: check_upper_y,
            delays_ms,
        }
    }

    /// Speed the table was built for
    pub fn speed(&self) -> SpeedFactor {
        self.speed
    }

    /// First row covered by the table
    pub fn first_row(&self) -> i32 {
        self.first_row
    }

    /// Last row covered by the table
    pub fn last_row(&self) -> i32 {
        self.first_row + self.delays_ms.len() as i32 - 1
    }

    /// Milliseconds until a note at row `y` reaches the hit line
    ///
    /// Returns `None` outside the corridor.
    #[inline]
    pub fn estimate_ms(&self, y: i32) -> Option<i64> {
        let index = usize::try_from(y.checked_sub(self.first_row)?).ok()?;
        self.delays_ms.get(index).copied()
    }

    /// Delay at the bottom of the corridor, the shortest time any detected
    /// note can still be away from the hit line
    pub fn min_delay_ms(&self) -> i64 {
        self.delays_ms.last().copied().unwrap_or(0)
    }

    /// Delay at the top of the corridor
    pub fn max_delay_ms(&self) -> i64 {
        self.delays_ms.first().copied().unwrap_or(0)
    }

    /// Iterate `(row, delay_ms)` over the whole table
    pub fn rows(&self) -> impl Iterator<Item = (i32, i64)> + '_ {
        self.delays_ms
            .iter()
            .enumerate()
            .map(move |(i, d)| (self.first_row + i as i32, *d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_points() {
        let estimator = NoteTimeEstimator::new(SpeedFactor::X10, 0, 567);
        assert_eq!(estimator.estimate_ms(0), Some(1370));
        let at_270 = estimator.estimate_ms(270).unwrap();
        assert!((335..=350).contains(&at_270), "delay at 270 = {}", at_270);
        let at_567 = estimator.estimate_ms(567).unwrap();
        assert!(at_567 < 60, "delay at hit line = {}", at_567);
    }

    #[test]
    fn test_out_of_range_rows() {
        let estimator = NoteTimeEstimator::new(SpeedFactor::X10, 0, 270);
        assert_eq!(estimator.estimate_ms(-1), None);
        assert_eq!(estimator.estimate_ms(271), None);
        assert!(estimator.estimate_ms(270).is_some());
    }

    #[test]
    fn test_offset_corridor() {
        let full = NoteTimeEstimator::new(SpeedFactor::X10, 0, 300);
        let offset = NoteTimeEstimator::new(SpeedFactor::X10, 100, 300);
        assert_eq!(offset.first_row(), 100);
        assert_eq!(offset.last_row(), 300);
        assert_eq!(offset.estimate_ms(99), None);
        assert_eq!(offset.estimate_ms(200), full.estimate_ms(200));
    }

    #[test]
    fn test_monotonic_for_all_speeds() {
        for speed in SpeedFactor::ALL {
            let estimator = NoteTimeEstimator::new(speed, 0, 719);
            let mut prev = i64::MAX;
            for (y, delay) in estimator.rows() {
                assert!(delay <= prev, "speed {} row {}: {} > {}", speed, y, delay, prev);
                assert!(delay >= 0);
                prev = delay;
            }
        }
    }

    #[test]
    fn test_faster_speed_is_shorter() {
        let slow = NoteTimeEstimator::new(SpeedFactor::X6, 0, 270);
        let fast = NoteTimeEstimator::new(SpeedFactor::X11, 0, 270);
        assert!(fast.max_delay_ms() < slow.max_delay_ms());
        assert!(fast.min_delay_ms() <= slow.min_delay_ms());
    }

    #[test]
    fn test_empty_table() {
        let estimator = NoteTimeEstimator::new(SpeedFactor::X10, 10, 5);
        assert_eq!(estimator.estimate_ms(7), None);
        assert_eq!(estimator.min_delay_ms(), 0);
    }

    #[test]
    fn test_speed_parse_and_display() {
        assert_eq!("x9".parse::<SpeedFactor>().unwrap(), SpeedFactor::X9);
        assert_eq!("11".parse::<SpeedFactor>().unwrap(), SpeedFactor::X11);
        assert!("x7".parse::<SpeedFactor>().is_err());
        assert_eq!(SpeedFactor::X10.to_string(), "x10");
    }
}
