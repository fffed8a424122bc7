//! Configuration type definitions

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::estimator::SpeedFactor;
use crate::geometry::Point;
use crate::player::menu::SongDifficulty;
use crate::vision::Color;

/// Track geometry: the trapezoid the lanes form on screen
///
/// The track spans rows `dy..=dy + height`. Its width grows linearly from
/// `upper_len` at the top row to `lower_len` at the bottom row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    /// Track width at the top row (pixels)
    pub upper_len: i32,

    /// Track width at the bottom row (pixels)
    pub lower_len: i32,

    /// Track height (pixels)
    pub height: i32,

    /// Screen row of the hit line
    pub hit_line_y: i32,

    /// First screen row of the detection corridor
    pub check_upper_y: i32,

    /// Last screen row of the detection corridor
    pub check_lower_y: i32,

    /// Horizontal offset of the track (pixels)
    pub dx: i32,

    /// Vertical offset of the track top (pixels)
    pub dy: i32,
}

impl Default for TrackConfig {
    fn default() -> Self {
        Self {
            upper_len: 59,
            lower_len: 1260,
            height: 720,
            hit_line_y: 567,
            check_upper_y: 0,
            check_lower_y: 270,
            dx: 10,
            dy: 0,
        }
    }
}

/// Play parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayConfig {
    /// Number of fingers kept pressed along the hit line during live play
    pub hold_cnt: usize,

    /// Tick interval of the play loops (ms)
    pub check_loop_delay_ms: u64,

    /// Tick interval while idle or navigating menus (ms)
    pub main_loop_delay_ms: u64,

    /// Hit time bias applied to live-detected notes (ms, usually negative)
    pub live_hit_delay_ms: i64,

    /// Hit time bias applied to chart-driven notes (ms, usually negative)
    pub chart_hit_delay_ms: i64,

    /// In-game note scroll speed
    pub speed: SpeedFactor,

    /// Highest difficulty the menu navigator may choose
    pub max_difficulty: SongDifficulty,

    /// Prefer the chart-driven path when a chart is supplied
    pub chart_mode: bool,

    /// Pick a difficulty and start songs automatically
    pub auto_select: bool,

    /// Consecutive identical screen-state matches required before acting
    pub debounce_count: u32,

    /// Stop the main loop after this many finished play sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sessions: Option<u32>,
}

impl Default for PlayConfig {
    fn default() -> Self {
        Self {
            hold_cnt: 6,
            check_loop_delay_ms: 50,
            main_loop_delay_ms: 200,
            live_hit_delay_ms: -40,
            chart_hit_delay_ms: -30,
            speed: SpeedFactor::X10,
            max_difficulty: SongDifficulty::Hard,
            chart_mode: false,
            auto_select: false,
            debounce_count: 3,
            max_sessions: None,
        }
    }
}

/// Gesture shapes and per-gesture timing bias
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    /// Tap press duration (ms)
    pub tap_duration_ms: i64,

    /// Vertical travel of an upward flick (pixels, negative = up)
    pub slide_move_dy: i32,

    /// Horizontal travel of a sideways flick (pixels)
    pub slide_move_dx: i32,

    /// Flick duration (ms)
    pub slide_duration_ms: i64,

    /// Interval between flick move steps (ms)
    pub slide_step_delay_ms: i64,

    /// Extra bias for flick notes (ms)
    pub slide_delay_ms: i64,

    /// Extra bias for the flick closing a hold (ms)
    pub hold_end_slide_delay_ms: i64,

    /// Extra bias for hold-begin taps (ms)
    pub hold_delay_ms: i64,

    /// Interval between interpolated hold steps in chart play (ms)
    pub hold_step_interval_ms: i64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            tap_duration_ms: 20,
            slide_move_dy: -200,
            slide_move_dx: 120,
            slide_duration_ms: 30,
            slide_step_delay_ms: 1,
            slide_delay_ms: -20,
            hold_end_slide_delay_ms: -40,
            hold_delay_ms: -60,
            hold_step_interval_ms: 10,
        }
    }
}

/// Note detection and cross-frame tracking parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Reference colors for blue, green, red and yellow notes (RGB)
    pub note_colors: [Color; 4],

    /// Reference colors of green and yellow hold trails (RGB)
    pub hold_colors: [Color; 2],

    /// Per-channel tolerance for note colors
    pub tap_color_delta: u8,

    /// Per-channel tolerance for hold trail colors
    pub hold_color_delta: u8,

    /// Regions narrower than this are ignored (pixels)
    pub min_note_width: u32,

    /// Distance beyond the note box at which the hold trail is sampled (pixels)
    pub hold_check_dy: i32,

    /// Hit time tolerance when associating observations (ms)
    pub match_time_ms: i64,

    /// Hit x tolerance when associating observations (pixels)
    pub match_x_px: i32,

    /// Upper bound on the observations needed before a note is dispatched
    pub min_sample_count: u32,

    /// Fraction of the expected observations required before dispatch
    pub sample_confidence_factor: f64,

    /// Margin added to the corridor exit delay when deciding to dispatch (ms)
    pub dispatch_margin_ms: i64,

    /// Ticks a pending sample may go unobserved before it is resolved
    pub max_missed_frames: u32,

    /// Maximum age of a cached frame reused by the play loop (ms)
    pub frame_max_staleness_ms: u64,

    /// Minimum PSNR for a screen-state template match (dB)
    pub min_psnr: f64,

    /// Screen point sampled for the alive/dead check
    pub alive_point: Point,

    /// Color at `alive_point` while a song is running (RGB)
    pub alive_color: Color,

    /// Color at `alive_point` once the song has ended (RGB)
    pub dead_color: Color,

    /// Per-channel tolerance of the alive/dead check
    pub alive_color_delta: u8,

    /// Interval between alive/dead checks (ms)
    pub alive_check_interval_ms: u64,

    /// Consecutive non-alive checks that end play
    pub alive_miss_limit: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            note_colors: [
                Color::new(243, 243, 255),
                Color::new(243, 255, 251),
                Color::new(255, 239, 247),
                Color::new(255, 251, 203),
            ],
            hold_colors: [Color::new(112, 189, 180), Color::new(178, 190, 176)],
            tap_color_delta: 3,
            hold_color_delta: 20,
            min_note_width: 5,
            hold_check_dy: 6,
            match_time_ms: 100,
            match_x_px: 50,
            min_sample_count: 5,
            sample_confidence_factor: 0.5,
            dispatch_margin_ms: 100,
            max_missed_frames: 2,
            frame_max_staleness_ms: 10,
            min_psnr: 35.0,
            alive_point: Point::new(1240, 30),
            alive_color: Color::new(136, 255, 153),
            dead_color: Color::new(50, 50, 76),
            alive_color_delta: 10,
            alive_check_interval_ms: 1000,
            alive_miss_limit: 3,
        }
    }
}

/// Touch scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TouchConfig {
    /// Upper bound of an idle executor wait (ms)
    pub shutdown_poll_ms: u64,

    /// The executor busy-waits for the final part of each wait (µs)
    pub spin_margin_us: u64,

    /// Reconnect attempts after a capture failure before play stops
    pub max_reconnect_attempts: u32,

    /// Pause between reconnect attempts (ms)
    pub reconnect_delay_ms: u64,

    /// Press duration of menu taps (ms)
    pub menu_tap_duration_ms: u64,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            shutdown_poll_ms: 100,
            spin_margin_us: 500,
            max_reconnect_attempts: 3,
            reconnect_delay_ms: 1000,
            menu_tap_duration_ms: 20,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level ("trace", "debug", "info", "warn", "error")
    pub level: String,

    /// Directory for log files (None = console only)
    pub log_dir: Option<PathBuf>,

    /// Enable metrics collection
    pub metrics: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            metrics: true,
        }
    }
}
