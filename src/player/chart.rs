//! Chart-driven play
//!
//! A chart is a pre-resolved list of timed notes in lane coordinates. The
//! whole song is compiled into touch streams up front; the only live input
//! is the moment the first note is detected, which anchors chart time to
//! the executor's clock.
//!
//! # Format
//!
//! ```json
//! {
//!   "notes": [
//!     { "time_ms": 1000, "lane": 3, "width": 2 },
//!     { "time_ms": 1250, "lane": 7, "width": 3, "flick": "up" }
//!   ],
//!   "holds": [
//!     {
//!       "steps": [
//!         { "time_ms": 2000, "lane": 0, "width": 3 },
//!         { "time_ms": 2600, "lane": 6, "width": 3 }
//!       ],
//!       "end_flick": "left"
//!     }
//!   ]
//! }
//! ```
//!
//! Lanes run 0..12 from the left end of the hit line; a note is touched at
//! the center of `lane..lane + width`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use super::{PlayerError, Result};
use crate::config::GestureConfig;
use crate::geometry::{HrLine, Point};
use crate::touch::{SlideMotion, TouchAction, TouchTaskStream};

/// Number of lanes across the hit line
pub const LANE_COUNT: f64 = 12.0;

/// Flick direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlickKind {
    /// Straight up
    Up,
    /// Up and to the left
    Left,
    /// Up and to the right
    Right,
}

impl FlickKind {
    /// Travel of the flick for the configured gesture shape
    pub fn offset(self, gesture: &GestureConfig) -> (i32, i32) {
        match self {
            Self::Up => (0, gesture.slide_move_dy),
            Self::Left => (-gesture.slide_move_dx, gesture.slide_move_dy),
            Self::Right => (gesture.slide_move_dx, gesture.slide_move_dy),
        }
    }
}

fn default_width() -> f64 {
    1.0
}

/// A tap or flick note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartNote {
    /// Hit time (ms from song start)
    pub time_ms: i64,
    /// Leftmost lane
    pub lane: f64,
    /// Width in lanes
    #[serde(default = "default_width")]
    pub width: f64,
    /// Flick direction, if the note is a flick
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flick: Option<FlickKind>,
}

/// One control point of a hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartStep {
    /// Time of the control point (ms from song start)
    pub time_ms: i64,
    /// Leftmost lane
    pub lane: f64,
    /// Width in lanes
    #[serde(default = "default_width")]
    pub width: f64,
}

/// A hold, followed through its control points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartHold {
    /// Control points, first is the press and last the release
    pub steps: Vec<ChartStep>,
    /// Flick performed instead of a plain release
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_flick: Option<FlickKind>,
}

/// A complete song
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    /// Taps and flicks
    #[serde(default)]
    pub notes: Vec<ChartNote>,
    /// Holds
    #[serde(default)]
    pub holds: Vec<ChartHold>,
}

impl Chart {
    /// Parse a chart from JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        let chart: Chart = serde_json::from_str(text)?;
        chart.validate()?;
        Ok(chart)
    }

    /// Load a chart file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let chart = Self::from_json(&std::fs::read_to_string(path)?)?;
        info!(
            "Loaded chart {}: {} note(s), {} hold(s)",
            path.display(),
            chart.notes.len(),
            chart.holds.len()
        );
        Ok(chart)
    }

    /// Check lane ranges and hold shapes
    pub fn validate(&self) -> Result<()> {
        let lanes = self
            .notes
            .iter()
            .map(|n| (n.lane, n.width))
            .chain(self.holds.iter().flat_map(|h| h.steps.iter().map(|s| (s.lane, s.width))));
        for (lane, width) in lanes {
            if !(lane >= 0.0 && width > 0.0 && lane + width <= LANE_COUNT) {
                return Err(PlayerError::Chart(format!(
                    "lane {}..{} outside 0..{}",
                    lane,
                    lane + width,
                    LANE_COUNT
                )));
            }
        }
        for (i, hold) in self.holds.iter().enumerate() {
            if hold.steps.len() < 2 {
                return Err(PlayerError::Chart(format!("hold #{} needs at least two steps", i)));
            }
            if hold.steps.windows(2).any(|w| w[1].time_ms < w[0].time_ms) {
                return Err(PlayerError::Chart(format!("hold #{} steps go back in time", i)));
            }
        }
        Ok(())
    }

    /// Time of the earliest note or hold press
    pub fn first_time_ms(&self) -> Option<i64> {
        self.notes
            .iter()
            .map(|n| n.time_ms)
            .chain(self.holds.iter().filter_map(|h| h.steps.first().map(|s| s.time_ms)))
            .min()
    }

    /// Time of the latest note or hold release
    pub fn last_time_ms(&self) -> Option<i64> {
        self.notes
            .iter()
            .map(|n| n.time_ms)
            .chain(self.holds.iter().filter_map(|h| h.steps.last().map(|s| s.time_ms)))
            .max()
    }

    /// Whether the chart has nothing to play
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty() && self.holds.is_empty()
    }
}

/// Screen position of a lane span on the hit line
pub fn lane_position(hit_line: &HrLine, lane: f64, width: f64) -> Point {
    let t = (lane + width / 2.0) / LANE_COUNT;
    hit_line.pos.offset((hit_line.length as f64 * t).round() as i32, 0)
}

/// Compile a chart into one touch stream per note and hold
///
/// Stream times are chart milliseconds shifted by `hit_delay_ms`; flicks
/// additionally carry their configured bias. The executor's base time is
/// what maps chart time onto the clock (see [`align_base_time`]).
pub fn build_program(
    chart: &Chart,
    hit_line: &HrLine,
    gesture: &GestureConfig,
    hit_delay_ms: i64,
) -> Result<Vec<TouchTaskStream>> {
    let flick_motion = SlideMotion::new(gesture.slide_duration_ms, gesture.slide_step_delay_ms);
    let mut program = Vec::with_capacity(chart.notes.len() + chart.holds.len());

    for note in &chart.notes {
        let pos = lane_position(hit_line, note.lane, note.width);
        let at = note.time_ms + hit_delay_ms;
        let mut stream = TouchTaskStream::new();
        match note.flick {
            Some(kind) => {
                let (dx, dy) = kind.offset(gesture);
                stream.add_slide(at + gesture.slide_delay_ms, pos, pos.offset(dx, dy), flick_motion)?;
            }
            None => {
                stream.add_tap(at, pos, gesture.tap_duration_ms)?;
            }
        }
        program.push(stream);
    }

    for hold in &chart.holds {
        program.push(build_hold(hold, hit_line, gesture, hit_delay_ms, flick_motion)?);
    }

    program.sort_by_key(|s| s.first_at_ns());
    debug!("Compiled chart into {} stream(s)", program.len());
    Ok(program)
}

fn build_hold(
    hold: &ChartHold,
    hit_line: &HrLine,
    gesture: &GestureConfig,
    hit_delay_ms: i64,
    flick_motion: SlideMotion,
) -> Result<TouchTaskStream> {
    let (first, last) = match (hold.steps.first(), hold.steps.last()) {
        (Some(first), Some(last)) if hold.steps.len() >= 2 => (first, last),
        _ => return Err(PlayerError::Chart("hold needs at least two steps".into())),
    };

    let mut stream = TouchTaskStream::new();
    stream.add_task(
        TouchAction::Down,
        lane_position(hit_line, first.lane, first.width),
        first.time_ms + hit_delay_ms,
    )?;

    let interval = gesture.hold_step_interval_ms.max(1);
    for pair in hold.steps.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let span = b.time_ms - a.time_ms;
        let steps = (span / interval).max(1);
        for i in 1..=steps {
            let t = i as f64 / steps as f64;
            let lane = a.lane + (b.lane - a.lane) * t;
            let width = a.width + (b.width - a.width) * t;
            stream.add_task(
                TouchAction::Move,
                lane_position(hit_line, lane, width),
                a.time_ms + span * i / steps + hit_delay_ms,
            )?;
        }
    }

    let end_pos = lane_position(hit_line, last.lane, last.width);
    let end_at = last.time_ms + hit_delay_ms;
    match hold.end_flick {
        Some(kind) => {
            let (dx, dy) = kind.offset(gesture);
            // The flick may not start before the last move already queued
            let at = (end_at + gesture.hold_end_slide_delay_ms).max(end_at);
            stream.add_slide(at, end_pos, end_pos.offset(dx, dy), flick_motion.without_down())?;
        }
        None => {
            stream.add_task(TouchAction::Up, end_pos, end_at)?;
        }
    }
    Ok(stream)
}

/// Executor base time that lines chart time up with a detected note
///
/// `detected_hit_ms` is the hit time of the first detected note relative
/// to `epoch`; the chart's first note lands on that same instant.
pub fn align_base_time(epoch: Instant, detected_hit_ms: i64, chart_first_ms: i64) -> Instant {
    let shift = detected_hit_ms - chart_first_ms;
    let magnitude = Duration::from_millis(shift.unsigned_abs());
    if shift >= 0 {
        epoch + magnitude
    } else {
        epoch.checked_sub(magnitude).unwrap_or(epoch)
    }
}
