//! Configuration management
//!
//! Handles loading, validation, and merging of configuration from:
//! - TOML files
//! - CLI arguments
//!
//! Every section carries serde defaults, so a partial file only needs the
//! values that differ from the calibrated defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod types;

pub use types::{
    DetectionConfig, GestureConfig, LoggingConfig, PlayConfig, TouchConfig, TrackConfig,
};

use crate::estimator::SpeedFactor;
use crate::geometry::{Point, TrackGeometry};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Track geometry
    #[serde(default)]
    pub track: TrackConfig,
    /// Play parameters
    #[serde(default)]
    pub play: PlayConfig,
    /// Gesture shapes and timing bias
    #[serde(default)]
    pub gesture: GestureConfig,
    /// Note detection and tracking
    #[serde(default)]
    pub detection: DetectionConfig,
    /// Touch scheduling
    #[serde(default)]
    pub touch: TouchConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Create default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Validate numeric ranges that do not depend on the display
    pub fn validate(&self) -> Result<()> {
        let t = &self.track;
        if t.upper_len <= 0 || t.lower_len <= 0 {
            anyhow::bail!(
                "Track widths must be positive (upper_len={}, lower_len={})",
                t.upper_len,
                t.lower_len
            );
        }
        if t.height <= 0 {
            anyhow::bail!("Track height must be positive, got {}", t.height);
        }
        if t.check_upper_y >= t.check_lower_y {
            anyhow::bail!(
                "check_upper_y ({}) must be above check_lower_y ({})",
                t.check_upper_y,
                t.check_lower_y
            );
        }
        let (top, bottom) = (t.dy, t.dy + t.height);
        for (name, y) in [
            ("hit_line_y", t.hit_line_y),
            ("check_upper_y", t.check_upper_y),
            ("check_lower_y", t.check_lower_y),
        ] {
            if y < top || y > bottom {
                anyhow::bail!("{} ({}) lies outside the track rows {}..={}", name, y, top, bottom);
            }
        }

        let p = &self.play;
        if p.check_loop_delay_ms == 0 || p.main_loop_delay_ms == 0 {
            anyhow::bail!("Loop delays must be at least 1ms");
        }
        if p.debounce_count == 0 {
            anyhow::bail!("debounce_count must be at least 1");
        }
        if p.max_sessions == Some(0) {
            anyhow::bail!("max_sessions must be at least 1 when set");
        }

        let g = &self.gesture;
        if g.tap_duration_ms < 0 {
            anyhow::bail!("tap_duration_ms cannot be negative ({})", g.tap_duration_ms);
        }
        if g.slide_duration_ms <= 0 || g.slide_step_delay_ms <= 0 {
            anyhow::bail!(
                "Flick duration ({}) and step delay ({}) must be positive",
                g.slide_duration_ms,
                g.slide_step_delay_ms
            );
        }
        if g.hold_step_interval_ms <= 0 {
            anyhow::bail!("hold_step_interval_ms must be positive");
        }

        let d = &self.detection;
        if d.min_note_width == 0 {
            anyhow::bail!("min_note_width must be at least 1");
        }
        if d.match_time_ms <= 0 || d.match_x_px <= 0 {
            anyhow::bail!(
                "Matching tolerances must be positive (time={}ms, x={}px)",
                d.match_time_ms,
                d.match_x_px
            );
        }
        if !(d.sample_confidence_factor > 0.0 && d.sample_confidence_factor <= 1.0) {
            anyhow::bail!(
                "sample_confidence_factor must be in (0, 1], got {}",
                d.sample_confidence_factor
            );
        }
        if d.min_sample_count == 0 {
            anyhow::bail!("min_sample_count must be at least 1");
        }
        if d.alive_check_interval_ms == 0 || d.alive_miss_limit == 0 {
            anyhow::bail!("Alive check interval and miss limit must be positive");
        }

        if self.touch.shutdown_poll_ms == 0 {
            anyhow::bail!("shutdown_poll_ms must be at least 1");
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}", self.logging.level),
        }

        Ok(())
    }

    /// Validate against the capture display bounds
    ///
    /// Fails when the hit line, either corridor edge or the alive check
    /// point falls outside a `width`x`height` display.
    pub fn validate_for_display(&self, width: u32, height: u32) -> Result<()> {
        self.validate()?;

        let inside = |p: Point| p.x >= 0 && p.y >= 0 && (p.x as u32) < width && (p.y as u32) < height;
        let geometry = TrackGeometry::new(&self.track);

        for (name, y) in [
            ("hit line", self.track.hit_line_y),
            ("corridor upper edge", self.track.check_upper_y),
            ("corridor lower edge", self.track.check_lower_y),
        ] {
            let line = geometry.line_at(y);
            if !inside(line.left()) || !inside(line.right()) {
                anyhow::bail!(
                    "Invalid track config: {} ({:?}..{:?}) out of bounds for {}x{} display",
                    name,
                    line.left(),
                    line.right(),
                    width,
                    height
                );
            }
        }

        if !inside(self.detection.alive_point) {
            anyhow::bail!(
                "Alive check point {:?} out of bounds for {}x{} display",
                self.detection.alive_point,
                width,
                height
            );
        }

        Ok(())
    }

    /// Override config with CLI arguments
    pub fn with_overrides(mut self, speed: Option<SpeedFactor>, chart_mode: Option<bool>) -> Self {
        if let Some(speed) = speed {
            self.play.speed = speed;
        }
        if let Some(chart_mode) = chart_mode {
            self.play.chart_mode = chart_mode;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default_config();
        assert_eq!(config.track.hit_line_y, 567);
        assert_eq!(config.play.hold_cnt, 6);
        assert_eq!(config.play.speed, SpeedFactor::X10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_fits_720p() {
        let config = Config::default_config();
        assert!(config.validate_for_display(1280, 720).is_ok());
    }

    #[test]
    fn test_hit_line_outside_small_display() {
        let config = Config::default_config();
        assert!(config.validate_for_display(640, 360).is_err());
    }

    #[test]
    fn test_config_validation_inverted_corridor() {
        let mut config = Config::default_config();
        config.track.check_upper_y = 300;
        config.track.check_lower_y = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_sessions() {
        let mut config = Config::default_config();
        config.play.max_sessions = Some(0);
        assert!(config.validate().is_err());
        config.play.max_sessions = Some(1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_step_delay() {
        let mut config = Config::default_config();
        config.gesture.slide_step_delay_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_log_level() {
        let mut config = Config::default_config();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [play]
            hold_cnt = 4
            speed = "x9"

            [track]
            hit_line_y = 560
            "#,
        )
        .unwrap();
        assert_eq!(config.play.hold_cnt, 4);
        assert_eq!(config.play.speed, SpeedFactor::X9);
        assert_eq!(config.track.hit_line_y, 560);
        assert_eq!(config.track.lower_len, 1260);
        assert_eq!(config.gesture.tap_duration_ms, 20);
    }

    #[test]
    fn test_overrides() {
        let config = Config::default_config().with_overrides(Some(SpeedFactor::X6), Some(true));
        assert_eq!(config.play.speed, SpeedFactor::X6);
        assert!(config.play.chart_mode);
    }
}
