//! Per-frame note detection
//!
//! # Pipeline
//!
//! 1. Classify every corridor pixel against the four note colors
//!    (per-channel `|c - ref| <= tap_color_delta`).
//! 2. Extract 8-connected regions per color and drop those narrower than
//!    `min_note_width`.
//! 3. Map each region center through the lane perspective onto the hit line
//!    and look its row up in the estimator for the hit time.
//! 4. Sample the hold-trail colors just above and below the region to tell
//!    hold begins from hold ends.
//!
//! Detection never fails: a frame without recognizable notes produces empty
//! lists and the next frame tries again.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

use super::regions::{find_regions, label_pixels, CorridorMask};
use super::Color;
use crate::capture::Frame;
use crate::config::{DetectionConfig, TrackConfig};
use crate::estimator::NoteTimeEstimator;
use crate::geometry::{HrLine, Point, Rect, TrackGeometry};

/// Note color classes, in detection order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteColor {
    /// Plain tap
    Blue,
    /// Hold begin or end
    Green,
    /// Flick
    Red,
    /// Critical
    Yellow,
}

impl NoteColor {
    /// All classes, in the order of `DetectionConfig::note_colors`
    pub const ALL: [NoteColor; 4] = [Self::Blue, Self::Green, Self::Red, Self::Yellow];

    /// Index into the configured color table
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for NoteColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Blue => "blue",
            Self::Green => "green",
            Self::Red => "red",
            Self::Yellow => "yellow",
        };
        f.write_str(s)
    }
}

/// Hold sub-state of a note
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HoldType {
    /// Not part of a hold
    #[default]
    None,
    /// Opens a hold: the trail continues above
    HoldBegin,
    /// Closes a hold: the trail comes from below
    HoldEnd,
}

/// A note observed on one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    /// Color class
    pub color: NoteColor,
    /// Detected region
    pub bounding_box: Rect,
    /// Where on the hit line the note will land
    pub hit_pos: Point,
    /// When the note reaches the hit line (ms since the finder's epoch)
    pub hit_time_ms: i64,
    /// Hold sub-state
    pub hold: HoldType,
    /// Whether the note must be flicked
    pub is_slide: bool,
}

impl Note {
    /// Part of a hold
    pub fn is_hold(&self) -> bool {
        self.hold != HoldType::None
    }

    /// Opens a hold
    pub fn is_hold_begin(&self) -> bool {
        self.hold == HoldType::HoldBegin
    }

    /// Closes a hold
    pub fn is_hold_end(&self) -> bool {
        self.hold == HoldType::HoldEnd
    }
}

/// Detects notes in captured frames
///
/// Hit times are expressed in milliseconds relative to `epoch`, the same
/// time base the touch executor schedules against.
pub struct NoteFinder {
    estimator: Arc<NoteTimeEstimator>,
    geometry: TrackGeometry,
    hit_line: HrLine,
    detection: DetectionConfig,
    upper_y: i32,
    lower_y: i32,
    mask: Option<(u32, u32, CorridorMask)>,
    epoch: Instant,
}

impl NoteFinder {
    /// Create a finder; the corridor mask is built lazily for the first
    /// frame size seen
    pub fn new(
        estimator: Arc<NoteTimeEstimator>,
        track: &TrackConfig,
        detection: &DetectionConfig,
        epoch: Instant,
    ) -> Self {
        let geometry = TrackGeometry::new(track);
        Self {
            hit_line: geometry.line_at(track.hit_line_y),
            geometry,
            estimator,
            detection: detection.clone(),
            upper_y: track.check_upper_y,
            lower_y: track.check_lower_y,
            mask: None,
            epoch,
        }
    }

    /// The hit line
    pub fn hit_line(&self) -> HrLine {
        self.hit_line
    }

    /// Time base of reported hit times
    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Milliseconds from the epoch to `t`
    pub fn millis_since_epoch(&self, t: Instant) -> i64 {
        match t.checked_duration_since(self.epoch) {
            Some(d) => d.as_millis() as i64,
            None => -(self.epoch.duration_since(t).as_millis() as i64),
        }
    }

    /// Detect all notes on `frame`, grouped by color class
    ///
    /// Always returns one entry per class in [`NoteColor::ALL`] order.
    pub fn find_all_notes(&mut self, frame: &Frame) -> Vec<(NoteColor, Vec<Note>)> {
        let (width, height) = (frame.width(), frame.height());
        let rebuild = !matches!(&self.mask, Some((w, h, _)) if *w == width && *h == height);
        if rebuild {
            let mask = CorridorMask::new(&self.geometry, self.upper_y, self.lower_y, width, height);
            trace!("Built corridor mask for {}x{} ({} px)", width, height, mask.area());
            self.mask = Some((width, height, mask));
        }
        let Some((_, _, mask)) = &self.mask else {
            return NoteColor::ALL.iter().map(|c| (*c, Vec::new())).collect();
        };

        let references = self.detection.note_colors;
        let delta = self.detection.tap_color_delta;
        let labels = label_pixels(frame.image(), mask, |px| {
            let color = Color::from(*px);
            references
                .iter()
                .position(|r| r.matches(color, delta))
                .map_or(0, |i| i as u8 + 1)
        });

        let captured_ms = self.millis_since_epoch(frame.captured_at());
        NoteColor::ALL
            .iter()
            .map(|&color| {
                let notes = find_regions(&labels, mask, color.index() as u8 + 1)
                    .into_iter()
                    .filter(|r| r.width >= self.detection.min_note_width as i32)
                    .filter_map(|r| self.note_from_region(frame, color, r, captured_ms))
                    .collect();
                (color, notes)
            })
            .collect()
    }

    fn note_from_region(&self, frame: &Frame, color: NoteColor, rect: Rect, captured_ms: i64) -> Option<Note> {
        let center = rect.center();
        let delay_ms = self.estimator.estimate_ms(center.y)?;
        let line = self.geometry.line_at(center.y);
        let hit_pos = self.hit_line.pos_of_from(&line, center);

        Some(Note {
            color,
            bounding_box: rect,
            hit_pos,
            hit_time_ms: captured_ms + delay_ms,
            hold: self.find_hold_type(frame, rect),
            is_slide: color == NoteColor::Red,
        })
    }

    fn find_hold_type(&self, frame: &Frame, rect: Rect) -> HoldType {
        let center_x = rect.center().x;
        let dy = self.detection.hold_check_dy;
        let above = Point::new(center_x, rect.y - dy);
        let below = Point::new(center_x, rect.bottom() - 1 + dy);

        let is_trail = |p: Point| {
            frame.pixel(p).is_some_and(|px| {
                let c = Color::from(px);
                self.detection
                    .hold_colors
                    .iter()
                    .any(|h| h.matches(c, self.detection.hold_color_delta))
            })
        };

        match (is_trail(above), is_trail(below)) {
            (true, false) => HoldType::HoldBegin,
            (false, true) => HoldType::HoldEnd,
            _ => HoldType::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::SpeedFactor;
    use image::{Rgb, RgbImage};

    fn finder(epoch: Instant) -> NoteFinder {
        let track = TrackConfig::default();
        let estimator = Arc::new(NoteTimeEstimator::new(
            SpeedFactor::X10,
            track.check_upper_y,
            track.check_lower_y,
        ));
        NoteFinder::new(estimator, &track, &DetectionConfig::default(), epoch)
    }

    fn fill(img: &mut RgbImage, rect: Rect, color: Color) {
        for y in rect.y..rect.bottom() {
            for x in rect.x..rect.right() {
                img.put_pixel(x as u32, y as u32, color.into());
            }
        }
    }

    fn notes_of(found: &[(NoteColor, Vec<Note>)], color: NoteColor) -> &[Note] {
        &found.iter().find(|(c, _)| *c == color).unwrap().1
    }

    #[test]
    fn test_empty_frame() {
        let epoch = Instant::now();
        let mut finder = finder(epoch);
        let frame = Frame::new(RgbImage::new(1280, 720), epoch);
        let found = finder.find_all_notes(&frame);
        assert_eq!(found.len(), 4);
        assert!(found.iter().all(|(_, notes)| notes.is_empty()));
    }

    #[test]
    fn test_detects_centered_blue_note() {
        let epoch = Instant::now();
        let mut finder = finder(epoch);
        let detection = DetectionConfig::default();
        let mut img = RgbImage::new(1280, 720);
        fill(&mut img, Rect::new(620, 196, 40, 9), detection.note_colors[0]);

        let frame = Frame::new(img, epoch);
        let found = finder.find_all_notes(&frame);
        let blue = notes_of(&found, NoteColor::Blue);
        assert_eq!(blue.len(), 1);
        let note = blue[0];
        assert_eq!(note.bounding_box, Rect::new(620, 196, 40, 9));
        assert_eq!(note.hit_pos.y, 567);
        assert!((note.hit_pos.x - 640).abs() <= 2, "hit x = {}", note.hit_pos.x);
        assert_eq!(note.hold, HoldType::None);
        assert!(!note.is_slide);
        assert!(note.hit_time_ms > 0);
    }

    #[test]
    fn test_narrow_region_dropped() {
        let epoch = Instant::now();
        let mut finder = finder(epoch);
        let mut img = RgbImage::new(1280, 720);
        fill(&mut img, Rect::new(630, 200, 4, 9), DetectionConfig::default().note_colors[0]);
        let found = finder.find_all_notes(&Frame::new(img, epoch));
        assert!(notes_of(&found, NoteColor::Blue).is_empty());
    }

    #[test]
    fn test_red_is_slide() {
        let epoch = Instant::now();
        let mut finder = finder(epoch);
        let mut img = RgbImage::new(1280, 720);
        fill(&mut img, Rect::new(600, 150, 30, 8), DetectionConfig::default().note_colors[2]);
        let found = finder.find_all_notes(&Frame::new(img, epoch));
        let red = notes_of(&found, NoteColor::Red);
        assert_eq!(red.len(), 1);
        assert!(red[0].is_slide);
    }

    #[test]
    fn test_hold_begin_and_end() {
        let epoch = Instant::now();
        let mut finder = finder(epoch);
        let detection = DetectionConfig::default();
        let mut img = RgbImage::new(1280, 720);
        let begin = Rect::new(600, 220, 40, 8);
        let end = Rect::new(600, 100, 40, 8);
        fill(&mut img, begin, detection.note_colors[1]);
        fill(&mut img, end, detection.note_colors[1]);
        // trail between the two notes
        fill(&mut img, Rect::new(612, 108, 16, 112), detection.hold_colors[0]);

        let found = finder.find_all_notes(&Frame::new(img, epoch));
        let mut green = notes_of(&found, NoteColor::Green).to_vec();
        green.sort_by_key(|n| n.bounding_box.y);
        assert_eq!(green.len(), 2);
        assert_eq!(green[0].hold, HoldType::HoldEnd);
        assert_eq!(green[1].hold, HoldType::HoldBegin);
        assert!(green[0].hit_time_ms > green[1].hit_time_ms);
    }

    #[test]
    fn test_hit_time_follows_capture_time() {
        let epoch = Instant::now();
        let mut finder = finder(epoch);
        let mut img = RgbImage::new(1280, 720);
        fill(&mut img, Rect::new(620, 196, 40, 9), DetectionConfig::default().note_colors[3]);
        let early = finder.find_all_notes(&Frame::new(img.clone(), epoch));
        let late = finder.find_all_notes(&Frame::new(img, epoch + std::time::Duration::from_millis(250)));
        let a = notes_of(&early, NoteColor::Yellow)[0].hit_time_ms;
        let b = notes_of(&late, NoteColor::Yellow)[0].hit_time_ms;
        assert_eq!(b - a, 250);
    }
}
