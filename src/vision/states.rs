//! Screen-state templates
//!
//! A screen state (song playing, song select, result screen, ...) is
//! recognized by comparing a small template image against the same spot of
//! the captured frame. The comparison uses PSNR; 35 dB or more counts as a
//! match by default.
//!
//! # On-disk layout
//!
//! ```text
//! states/
//! ├── song_playing/
//! │   └── 1180_12.png          template placed at x=1180, y=12
//! └── multi_play_start/
//!     ├── 412_630.png
//!     └── state.json           optional named buttons and points
//! ```
//!
//! `state.json`:
//!
//! ```json
//! {
//!   "buttons": { "start": { "x": 1100, "y": 640 } },
//!   "points":  { "hard_status": { "x": 512, "y": 300 } }
//! }
//! ```

use image::RgbImage;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

use super::{Result, VisionError};
use crate::capture::Frame;
use crate::geometry::Point;

/// Named buttons and sample points attached to a state
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct StateMeta {
    buttons: HashMap<String, Point>,
    points: HashMap<String, Point>,
}

/// A recognizable screen state
#[derive(Debug, Clone)]
pub struct StateTemplate {
    name: String,
    image: RgbImage,
    pos: Point,
    buttons: HashMap<String, Point>,
    points: HashMap<String, Point>,
}

impl StateTemplate {
    /// Create a template placed at `pos`
    pub fn new(name: impl Into<String>, image: RgbImage, pos: Point) -> Self {
        Self {
            name: name.into(),
            image,
            pos,
            buttons: HashMap::new(),
            points: HashMap::new(),
        }
    }

    /// Attach a named button
    pub fn with_button(mut self, name: impl Into<String>, pos: Point) -> Self {
        self.buttons.insert(name.into(), pos);
        self
    }

    /// Attach a named sample point
    pub fn with_point(mut self, name: impl Into<String>, pos: Point) -> Self {
        self.points.insert(name.into(), pos);
        self
    }

    /// State name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Button position by name
    pub fn button(&self, name: &str) -> Option<Point> {
        self.buttons.get(name).copied()
    }

    /// Sample point by name
    pub fn point(&self, name: &str) -> Option<Point> {
        self.points.get(name).copied()
    }

    /// PSNR between the template and the matching frame region (dB)
    ///
    /// Returns 0 when the template does not fit inside the frame and
    /// infinity for an exact match.
    pub fn psnr(&self, frame: &Frame) -> f64 {
        let image = frame.image();
        let (tw, th) = self.image.dimensions();
        if self.pos.x < 0
            || self.pos.y < 0
            || tw == 0
            || th == 0
            || self.pos.x as u32 + tw > image.width()
            || self.pos.y as u32 + th > image.height()
        {
            return 0.0;
        }

        let (ox, oy) = (self.pos.x as u32, self.pos.y as u32);
        let mut sum_sq = 0u64;
        for (x, y, px) in self.image.enumerate_pixels() {
            let other = image.get_pixel(ox + x, oy + y);
            for c in 0..3 {
                let d = px.0[c].abs_diff(other.0[c]) as u64;
                sum_sq += d * d;
            }
        }
        if sum_sq == 0 {
            return f64::INFINITY;
        }
        let mse = sum_sq as f64 / (tw as f64 * th as f64 * 3.0);
        10.0 * (255.0f64 * 255.0 / mse).log10()
    }

    /// Whether `frame` shows this state
    pub fn matches(&self, frame: &Frame, min_psnr: f64) -> bool {
        self.psnr(frame) >= min_psnr
    }
}

/// The set of known screen states
#[derive(Debug, Clone, Default)]
pub struct StateLibrary {
    states: HashMap<String, StateTemplate>,
}

impl StateLibrary {
    /// Create an empty library
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every state directory below `dir`
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut library = Self::new();

        let mut entries: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        entries.sort();

        for state_dir in entries {
            match load_state(&state_dir) {
                Ok(Some(state)) => {
                    debug!("Loaded state template '{}' at {:?}", state.name, state.pos);
                    library.insert(state);
                }
                Ok(None) => warn!("No template image in {}, skipping", state_dir.display()),
                Err(e) => return Err(e),
            }
        }

        info!("Loaded {} screen state template(s) from {}", library.len(), dir.display());
        Ok(library)
    }

    /// Add or replace a state
    pub fn insert(&mut self, state: StateTemplate) {
        self.states.insert(state.name.clone(), state);
    }

    /// Look a state up by name
    pub fn get(&self, name: &str) -> Result<&StateTemplate> {
        self.states
            .get(name)
            .ok_or_else(|| VisionError::UnknownState(name.to_string()))
    }

    /// Whether a state is known
    pub fn contains(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    /// Number of states
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Whether the library is empty
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// The best matching state among `names`, if any reaches `min_psnr`
    ///
    /// Unknown names are ignored.
    pub fn match_any(&self, names: &[&str], frame: &Frame, min_psnr: f64) -> Option<&StateTemplate> {
        names
            .iter()
            .filter_map(|n| self.states.get(*n))
            .map(|s| (s, s.psnr(frame)))
            .filter(|(_, psnr)| *psnr >= min_psnr)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(s, _)| s)
    }
}

fn load_state(state_dir: &Path) -> Result<Option<StateTemplate>> {
    let name = state_dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| VisionError::InvalidTemplateName(state_dir.display().to_string()))?
        .to_string();

    let mut template = None;
    for entry in std::fs::read_dir(state_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("png") {
            continue;
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        let pos = parse_position(stem)
            .ok_or_else(|| VisionError::InvalidTemplateName(path.display().to_string()))?;
        let image = image::open(&path)?.to_rgb8();
        template = Some(StateTemplate::new(name.clone(), image, pos));
        break;
    }

    let Some(mut template) = template else {
        return Ok(None);
    };

    let meta_path = state_dir.join("state.json");
    if meta_path.exists() {
        let meta: StateMeta = serde_json::from_str(&std::fs::read_to_string(&meta_path)?)?;
        template.buttons = meta.buttons;
        template.points = meta.points;
    }
    Ok(Some(template))
}

/// Parse `"<x>_<y>"`
fn parse_position(stem: &str) -> Option<Point> {
    let (x, y) = stem.split_once('_')?;
    Some(Point::new(x.parse().ok()?, y.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::time::Instant;

    fn frame_with_patch(pos: Point, patch: &RgbImage) -> Frame {
        let mut img = RgbImage::new(64, 48);
        image::imageops::replace(&mut img, patch, pos.x as i64, pos.y as i64);
        Frame::new(img, Instant::now())
    }

    fn patch() -> RgbImage {
        RgbImage::from_fn(8, 8, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, 200]))
    }

    #[test]
    fn test_exact_match_is_infinite() {
        let state = StateTemplate::new("s", patch(), Point::new(10, 10));
        let frame = frame_with_patch(Point::new(10, 10), &patch());
        assert!(state.psnr(&frame).is_infinite());
        assert!(state.matches(&frame, 35.0));
    }

    #[test]
    fn test_shifted_patch_does_not_match() {
        let state = StateTemplate::new("s", patch(), Point::new(10, 10));
        let frame = frame_with_patch(Point::new(30, 20), &patch());
        assert!(!state.matches(&frame, 35.0));
    }

    #[test]
    fn test_small_noise_still_matches() {
        let state = StateTemplate::new("s", patch(), Point::new(0, 0));
        let mut noisy = patch();
        noisy.put_pixel(3, 3, Rgb([95, 95, 205]));
        let frame = frame_with_patch(Point::new(0, 0), &noisy);
        let psnr = state.psnr(&frame);
        assert!(psnr.is_finite() && psnr > 35.0, "psnr = {}", psnr);
    }

    #[test]
    fn test_out_of_bounds_template() {
        let state = StateTemplate::new("s", patch(), Point::new(60, 0));
        let frame = frame_with_patch(Point::new(0, 0), &patch());
        assert_eq!(state.psnr(&frame), 0.0);
    }

    #[test]
    fn test_parse_position() {
        assert_eq!(parse_position("1180_12"), Some(Point::new(1180, 12)));
        assert_eq!(parse_position("template"), None);
        assert_eq!(parse_position("1_x"), None);
    }

    #[test]
    fn test_match_any_prefers_best() {
        let mut library = StateLibrary::new();
        library.insert(StateTemplate::new("a", patch(), Point::new(0, 0)));
        library.insert(StateTemplate::new("b", patch(), Point::new(20, 20)));
        let frame = frame_with_patch(Point::new(20, 20), &patch());
        let found = library.match_any(&["a", "b", "missing"], &frame, 35.0);
        assert_eq!(found.map(|s| s.name()), Some("b"));
        assert!(library.get("missing").is_err());
    }
}
