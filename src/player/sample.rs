//! Cross-frame note tracking
//!
//! Every frame re-detects every note from scratch. A [`NoteSample`] collects
//! the observations believed to belong to one physical note and averages
//! their hit estimates, so the gesture is timed from many frames instead of
//! one.
//!
//! # Lifecycle
//!
//! ```text
//!  unmatched observation ──▶ pending (count=1)
//!                               │  matching observation: running average
//!                               ▼
//!           hit time inside the action window, or unseen for too long
//!                               │
//!              count >= min ────┴──── count < min
//!                 dispatch              drop (logged)
//!                    │                     │
//!                    └──── touched ◀───────┘
//!                              │  absorbs further observations
//!                              ▼
//!                 removed once the hit time has passed
//! ```

use tracing::trace;

use crate::config::DetectionConfig;
use crate::estimator::NoteTimeEstimator;
use crate::vision::{Note, NoteColor};

/// Time a resolved sample keeps absorbing observations after its hit (ms)
const RESOLVED_EXPIRY_MS: i64 = 200;

/// Observations believed to be one physical note
#[derive(Debug, Clone)]
pub struct NoteSample {
    /// Latest observation, with hit x and hit time replaced by the averages
    pub note: Note,
    /// Number of observations
    pub count: u32,
    /// Already dispatched or dropped
    pub touched: bool,
    /// Consecutive ticks without a matching observation
    pub missed_frames: u32,
}

impl NoteSample {
    /// Seed a sample from its first observation
    pub fn new(note: Note) -> Self {
        Self {
            note,
            count: 1,
            touched: false,
            missed_frames: 0,
        }
    }

    /// Fold in another observation
    ///
    /// Hit x and hit time become the running average; box and hold state
    /// take the latest value; the flick flag sticks once seen.
    pub fn add_sample(&mut self, sample: &Note) {
        let n = self.count as i64;
        self.note.hit_pos.x = ((self.note.hit_pos.x as i64 * n + sample.hit_pos.x as i64) / (n + 1)) as i32;
        self.note.hit_time_ms = (self.note.hit_time_ms * n + sample.hit_time_ms) / (n + 1);
        self.note.bounding_box = sample.bounding_box;
        self.note.hold = sample.hold;
        self.note.is_slide |= sample.is_slide;
        self.count += 1;
        self.missed_frames = 0;
    }

    fn distance(&self, note: &Note) -> (i64, i32) {
        (
            (self.note.hit_time_ms - note.hit_time_ms).abs(),
            (self.note.hit_pos.x - note.hit_pos.x).abs(),
        )
    }
}

/// What to do with a sample that reached its action window
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Enough observations: play the gesture
    Dispatch(Note),
    /// Too few observations: skip it
    Drop {
        /// The averaged note
        note: Note,
        /// Observations collected
        count: u32,
    },
}

/// Matching and resolution parameters
#[derive(Debug, Clone, Copy)]
pub struct TrackerParams {
    /// Hit time tolerance (ms)
    pub match_time_ms: i64,
    /// Hit x tolerance (px)
    pub match_x_px: i32,
    /// Observations needed for dispatch
    pub min_samples: u32,
    /// A sample resolves once its hit time is within this much of now (ms)
    pub window_ms: i64,
    /// Unobserved ticks before a sample resolves anyway
    pub max_missed_frames: u32,
}

impl TrackerParams {
    /// Derive parameters from configuration and the corridor timing
    pub fn from_config(detection: &DetectionConfig, estimator: &NoteTimeEstimator, loop_delay_ms: u64) -> Self {
        Self {
            match_time_ms: detection.match_time_ms,
            match_x_px: detection.match_x_px,
            min_samples: calc_min_sample_count(
                estimator,
                loop_delay_ms,
                detection.sample_confidence_factor,
                detection.min_sample_count,
            ),
            window_ms: estimator.min_delay_ms() + detection.dispatch_margin_ms,
            max_missed_frames: detection.max_missed_frames,
        }
    }
}

/// Observations required before a note is trusted
///
/// A note spends `(max_delay - min_delay) / loop_delay` ticks in the
/// corridor; `factor` of those are required, capped at `cap` and at least 1.
pub fn calc_min_sample_count(estimator: &NoteTimeEstimator, loop_delay_ms: u64, factor: f64, cap: u32) -> u32 {
    let traversal_ms = (estimator.max_delay_ms() - estimator.min_delay_ms()).max(0) as f64;
    let frames = traversal_ms / loop_delay_ms.max(1) as f64;
    ((frames * factor) as u32).clamp(1, cap.max(1))
}

/// Pending and recently resolved samples
#[derive(Debug)]
pub struct SampleTracker {
    params: TrackerParams,
    samples: Vec<NoteSample>,
}

impl SampleTracker {
    /// Create an empty tracker
    pub fn new(params: TrackerParams) -> Self {
        Self {
            params,
            samples: Vec::new(),
        }
    }

    /// Tracker parameters
    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    /// Fold one frame's detections into the samples
    ///
    /// Each observation goes to the nearest sample of the same color within
    /// both tolerances; observations of resolved notes are absorbed without
    /// changing them. Samples not matched on this frame count a missed
    /// frame.
    pub fn observe(&mut self, notes: &[(NoteColor, Vec<Note>)]) {
        let mut seen = vec![false; self.samples.len()];

        for note in notes.iter().flat_map(|(_, notes)| notes.iter()) {
            let best = self
                .samples
                .iter()
                .enumerate()
                .filter(|(_, s)| s.note.color == note.color)
                .map(|(i, s)| (i, s.distance(note)))
                .filter(|(_, (dt, dx))| *dt <= self.params.match_time_ms && *dx <= self.params.match_x_px)
                .min_by_key(|(_, (dt, dx))| (*dt, *dx))
                .map(|(i, _)| i);

            match best {
                Some(i) => {
                    if i < seen.len() {
                        seen[i] = true;
                    }
                    let sample = &mut self.samples[i];
                    if !sample.touched {
                        sample.add_sample(note);
                    }
                }
                None => {
                    trace!(
                        "New {} note sample at x={} hit={}ms",
                        note.color,
                        note.hit_pos.x,
                        note.hit_time_ms
                    );
                    self.samples.push(NoteSample::new(*note));
                }
            }
        }

        for (sample, seen) in self.samples.iter_mut().zip(seen) {
            if !seen {
                sample.missed_frames += 1;
            }
        }
    }

    /// Resolve every sample that is due at `now_ms`
    ///
    /// Resolved samples stay in the tracker, flagged touched, until
    /// their hit time has passed.
    pub fn take_due(&mut self, now_ms: i64) -> Vec<Resolution> {
        let mut resolved = Vec::new();
        for sample in self.samples.iter_mut().filter(|s| !s.touched) {
            let due = sample.note.hit_time_ms <= now_ms + self.params.window_ms
                || sample.missed_frames > self.params.max_missed_frames;
            if !due {
                continue;
            }
            sample.touched = true;
            if sample.count >= self.params.min_samples {
                resolved.push(Resolution::Dispatch(sample.note));
            } else {
                resolved.push(Resolution::Drop {
                    note: sample.note,
                    count: sample.count,
                });
            }
        }

        self.samples
            .retain(|s| !(s.touched && s.note.hit_time_ms + RESOLVED_EXPIRY_MS < now_ms));
        resolved.sort_by_key(|r| match r {
            Resolution::Dispatch(n) | Resolution::Drop { note: n, .. } => n.hit_time_ms,
        });
        resolved
    }

    /// Samples not yet resolved
    pub fn pending(&self) -> usize {
        self.samples.iter().filter(|s| !s.touched).count()
    }

    /// All tracked samples
    pub fn samples(&self) -> &[NoteSample] {
        &self.samples
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::SpeedFactor;
    use crate::geometry::{Point, Rect};
    use crate::vision::HoldType;

    fn params() -> TrackerParams {
        TrackerParams {
            match_time_ms: 100,
            match_x_px: 50,
            min_samples: 3,
            window_ms: 400,
            max_missed_frames: 2,
        }
    }

    fn note(color: NoteColor, x: i32, hit: i64) -> Note {
        Note {
            color,
            bounding_box: Rect::new(x - 10, 100, 20, 8),
            hit_pos: Point::new(x, 567),
            hit_time_ms: hit,
            hold: HoldType::None,
            is_slide: color == NoteColor::Red,
        }
    }

    fn frame(notes: Vec<Note>) -> Vec<(NoteColor, Vec<Note>)> {
        NoteColor::ALL
            .iter()
            .map(|c| (*c, notes.iter().filter(|n| n.color == *c).copied().collect()))
            .collect()
    }

    #[test]
    fn test_running_average() {
        let mut sample = NoteSample::new(note(NoteColor::Blue, 100, 1000));
        sample.add_sample(&note(NoteColor::Blue, 110, 1030));
        sample.add_sample(&note(NoteColor::Blue, 120, 1020));
        assert_eq!(sample.count, 3);
        assert_eq!(sample.note.hit_pos.x, 110);
        assert_eq!(sample.note.hit_time_ms, 1016);
    }

    #[test]
    fn test_flick_flag_sticks() {
        let mut sample = NoteSample::new(note(NoteColor::Blue, 100, 1000));
        let mut flick = note(NoteColor::Blue, 100, 1000);
        flick.is_slide = true;
        sample.add_sample(&flick);
        sample.add_sample(&note(NoteColor::Blue, 100, 1000));
        assert!(sample.note.is_slide);
    }

    #[test]
    fn test_matching_respects_color_and_tolerance() {
        let mut tracker = SampleTracker::new(params());
        tracker.observe(&frame(vec![note(NoteColor::Blue, 300, 2000)]));
        tracker.observe(&frame(vec![
            note(NoteColor::Blue, 320, 2040),
            note(NoteColor::Green, 300, 2000),
            note(NoteColor::Blue, 400, 2000),
            note(NoteColor::Blue, 300, 2200),
        ]));
        assert_eq!(tracker.samples().len(), 4);
        assert_eq!(tracker.samples()[0].count, 2);
    }

    #[test]
    fn test_nearest_sample_wins() {
        let mut tracker = SampleTracker::new(params());
        tracker.observe(&frame(vec![note(NoteColor::Blue, 300, 2000), note(NoteColor::Blue, 340, 2000)]));
        tracker.observe(&frame(vec![note(NoteColor::Blue, 335, 2000)]));
        assert_eq!(tracker.samples()[0].count, 1);
        assert_eq!(tracker.samples()[1].count, 2);
    }

    #[test]
    fn test_dispatch_once_when_due() {
        let mut tracker = SampleTracker::new(params());
        for _ in 0..3 {
            tracker.observe(&frame(vec![note(NoteColor::Blue, 300, 2000)]));
        }
        assert!(tracker.take_due(1000).is_empty());

        let due = tracker.take_due(1650);
        assert_eq!(due, vec![Resolution::Dispatch(note(NoteColor::Blue, 300, 2000))]);

        // Later frames of the same note are absorbed, never re-dispatched
        tracker.observe(&frame(vec![note(NoteColor::Blue, 300, 2010)]));
        assert!(tracker.take_due(1700).is_empty());
        assert_eq!(tracker.samples().len(), 1);
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_low_confidence_dropped() {
        let mut tracker = SampleTracker::new(params());
        tracker.observe(&frame(vec![note(NoteColor::Red, 500, 2000)]));
        let due = tracker.take_due(1700);
        assert!(matches!(due.as_slice(), [Resolution::Drop { count: 1, .. }]));
    }

    #[test]
    fn test_unseen_sample_resolves() {
        let mut tracker = SampleTracker::new(params());
        for _ in 0..3 {
            tracker.observe(&frame(vec![note(NoteColor::Yellow, 200, 9000)]));
        }
        for _ in 0..3 {
            tracker.observe(&frame(Vec::new()));
        }
        assert!(matches!(tracker.take_due(0).as_slice(), [Resolution::Dispatch(_)]));
    }

    #[test]
    fn test_resolved_samples_expire() {
        let mut tracker = SampleTracker::new(params());
        tracker.observe(&frame(vec![note(NoteColor::Blue, 300, 2000)]));
        tracker.take_due(1900);
        assert_eq!(tracker.samples().len(), 1);
        tracker.take_due(2000 + RESOLVED_EXPIRY_MS + 1);
        assert!(tracker.samples().is_empty());
    }

    #[test]
    fn test_min_sample_count() {
        let estimator = NoteTimeEstimator::new(SpeedFactor::X10, 0, 270);
        assert_eq!(calc_min_sample_count(&estimator, 50, 0.5, 5), 5);
        assert_eq!(calc_min_sample_count(&estimator, 50, 0.1, 5), 2);
        assert_eq!(calc_min_sample_count(&estimator, 5000, 0.5, 5), 1);
    }
}
