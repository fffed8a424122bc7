//! Touch Task Streams
//!
//! A stream is one gesture program: a validated, time-ordered list of
//! Down/Move/Up actions played through a single slot.
//!
//! # Invariants
//!
//! - The first action is Down
//! - Down only follows Up
//! - Up never follows Up
//! - Move only while the finger is down
//! - Times never decrease
//!
//! Every `add_*` call validates the whole batch it appends before touching
//! the stream, so a rejected call leaves the stream unchanged.
//!
//! # Slide Motion
//!
//! Slides blend `from` into `to` through the cubic
//!
//! ```text
//! p(t) = a·t + b·t² + c·t³      p(0) = 0, p(1) = 1
//! a = s0                        p'(0) = s0 (ease_in)
//! b = 3 - 2·s0 - s1             p'(1) = s1 (ease_out)
//! c = s0 + s1 - 2
//! ```
//!
//! With `s0 = s1 = 1` the motion is linear; smaller slopes at an end make
//! the finger start or stop gently.

use super::{Result, SlotId, TouchAction, TouchError, TouchTask, NANOS_PER_MS};
use crate::geometry::Point;

/// Cubic ease blend factor at `t` in `[0, 1]`
///
/// Exactly 0 at `t <= 0` and exactly 1 at `t >= 1`.
pub fn ease_curve(t: f64, ease_in: f64, ease_out: f64) -> f64 {
    if t <= 0.0 {
        return 0.0;
    }
    if t >= 1.0 {
        return 1.0;
    }
    let a = ease_in;
    let b = 3.0 - 2.0 * ease_in - ease_out;
    let c = ease_in + ease_out - 2.0;
    ((c * t + b) * t + a) * t
}

/// Interpolate between two points with blend factor `p`
#[inline]
fn lerp(from: Point, to: Point, p: f64) -> Point {
    Point::new(
        from.x + ((to.x - from.x) as f64 * p).round() as i32,
        from.y + ((to.y - from.y) as f64 * p).round() as i32,
    )
}

/// Shape and timing of a slide
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlideMotion {
    /// Total slide duration (ms)
    pub duration_ms: i64,
    /// Interval between Move steps (ms)
    pub step_delay_ms: i64,
    /// Curve slope at the start
    pub ease_in: f64,
    /// Curve slope at the end
    pub ease_out: f64,
    /// Emit a Down at `from` first
    pub with_down: bool,
    /// Emit an Up at the end
    pub with_up: bool,
}

impl SlideMotion {
    /// Linear slide with Down and Up
    pub fn new(duration_ms: i64, step_delay_ms: i64) -> Self {
        Self {
            duration_ms,
            step_delay_ms,
            ease_in: 1.0,
            ease_out: 1.0,
            with_down: true,
            with_up: true,
        }
    }

    /// Set the curve slopes
    pub fn eased(mut self, ease_in: f64, ease_out: f64) -> Self {
        self.ease_in = ease_in;
        self.ease_out = ease_out;
        self
    }

    /// Continue from a finger that is already down
    pub fn without_down(mut self) -> Self {
        self.with_down = false;
        self
    }

    /// Leave the finger down at the end
    pub fn without_up(mut self) -> Self {
        self.with_up = false;
        self
    }
}

/// A validated gesture program
#[derive(Debug, Clone, Default)]
pub struct TouchTaskStream {
    tasks: Vec<TouchTask>,
    cursor: usize,
    slot: Option<SlotId>,
}

impl TouchTaskStream {
    /// Create an empty stream
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one action at `at_ms`
    pub fn add_task(&mut self, action: TouchAction, pos: Point, at_ms: i64) -> Result<&mut Self> {
        self.add_task_ns(TouchTask {
            action,
            pos,
            at_ns: at_ms * NANOS_PER_MS,
        })
    }

    /// Append one action with a nanosecond timestamp
    pub fn add_task_ns(&mut self, task: TouchTask) -> Result<&mut Self> {
        self.append(vec![task])
    }

    /// Append a tap: Down at `at_ms`, Up `duration_ms` later
    pub fn add_tap(&mut self, at_ms: i64, pos: Point, duration_ms: i64) -> Result<&mut Self> {
        if duration_ms < 0 {
            return Err(TouchError::InvalidParameter(format!(
                "tap duration must not be negative ({}ms)",
                duration_ms
            )));
        }
        let at_ns = at_ms * NANOS_PER_MS;
        self.append(vec![
            TouchTask {
                action: TouchAction::Down,
                pos,
                at_ns,
            },
            TouchTask {
                action: TouchAction::Up,
                pos,
                at_ns: at_ns + duration_ms * NANOS_PER_MS,
            },
        ])
    }

    /// Append a slide from `from` to `to` starting at `at_ms`
    ///
    /// Emits an optional Down at `from`, then one Move every
    /// `step_delay_ms` (at least one, the last landing exactly on `to` at
    /// `at_ms + duration_ms`), then an optional Up.
    pub fn add_slide(&mut self, at_ms: i64, from: Point, to: Point, motion: SlideMotion) -> Result<&mut Self> {
        if motion.duration_ms <= 0 || motion.step_delay_ms <= 0 {
            return Err(TouchError::InvalidParameter(format!(
                "slide duration ({}ms) and step delay ({}ms) must be positive",
                motion.duration_ms, motion.step_delay_ms
            )));
        }
        if !motion.ease_in.is_finite() || !motion.ease_out.is_finite() {
            return Err(TouchError::InvalidParameter("slide ease slopes must be finite".into()));
        }

        let start_ns = at_ms * NANOS_PER_MS;
        let duration_ns = motion.duration_ms * NANOS_PER_MS;
        let steps = (motion.duration_ms / motion.step_delay_ms).max(1);

        let mut batch = Vec::with_capacity(steps as usize + 2);
        if motion.with_down {
            batch.push(TouchTask {
                action: TouchAction::Down,
                pos: from,
                at_ns: start_ns,
            });
        }
        for i in 1..=steps {
            let t = i as f64 / steps as f64;
            batch.push(TouchTask {
                action: TouchAction::Move,
                pos: lerp(from, to, ease_curve(t, motion.ease_in, motion.ease_out)),
                at_ns: start_ns + duration_ns * i / steps,
            });
        }
        if motion.with_up {
            batch.push(TouchTask {
                action: TouchAction::Up,
                pos: to,
                at_ns: start_ns + duration_ns,
            });
        }
        self.append(batch)
    }

    fn append(&mut self, batch: Vec<TouchTask>) -> Result<&mut Self> {
        let mut last = self.tasks.last().copied();
        for task in &batch {
            check_next(last.as_ref(), task)?;
            last = Some(*task);
        }
        self.tasks.extend(batch);
        Ok(self)
    }

    /// All actions
    pub fn tasks(&self) -> &[TouchTask] {
        &self.tasks
    }

    /// Number of actions
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the stream has no actions
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// The next action to execute
    pub fn next_task(&self) -> Option<&TouchTask> {
        self.tasks.get(self.cursor)
    }

    /// Whether every action has executed
    pub fn is_finished(&self) -> bool {
        self.cursor >= self.tasks.len()
    }

    /// Actions not yet executed
    pub fn remaining(&self) -> usize {
        self.tasks.len().saturating_sub(self.cursor)
    }

    /// Whether at least one action has been dispatched
    pub fn has_started(&self) -> bool {
        self.cursor > 0
    }

    /// Time of the first action (ns)
    pub fn first_at_ns(&self) -> Option<i64> {
        self.tasks.first().map(|t| t.at_ns)
    }

    /// Time of the last action (ns)
    pub fn last_at_ns(&self) -> Option<i64> {
        self.tasks.last().map(|t| t.at_ns)
    }

    /// Whether the finger is left down after the last action
    pub fn ends_down(&self) -> bool {
        self.tasks.last().is_some_and(|t| t.action != TouchAction::Up)
    }

    /// Slot assigned by the last executed Down
    pub fn slot(&self) -> Option<SlotId> {
        self.slot
    }

    pub(crate) fn set_slot(&mut self, slot: Option<SlotId>) {
        self.slot = slot;
    }

    pub(crate) fn advance(&mut self) {
        if self.cursor < self.tasks.len() {
            self.cursor += 1;
        }
    }
}

fn check_next(last: Option<&TouchTask>, task: &TouchTask) -> Result<()> {
    use TouchAction::{Down, Move, Up};

    let reason = match (last.map(|t| t.action), task.action) {
        (None, Down) | (Some(Up), Down) | (Some(Down | Move), Move | Up) => None,
        (None, action) => Some(format!("stream must start with down, got {}", action)),
        (Some(Up), Up) => Some("up directly after up".to_string()),
        (Some(Up), Move) => Some("move while the finger is up".to_string()),
        (Some(Down | Move), Down) => Some("down while the finger is already down".to_string()),
    };
    if let Some(reason) = reason {
        return Err(TouchError::InvalidSequence(reason));
    }

    if let Some(last) = last {
        if task.at_ns < last.at_ns {
            return Err(TouchError::InvalidSequence(format!(
                "{} at {}ns precedes previous action at {}ns",
                task.action, task.at_ns, last.at_ns
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn actions(stream: &TouchTaskStream) -> Vec<TouchAction> {
        stream.tasks().iter().map(|t| t.action).collect()
    }

    #[test]
    fn test_tap() {
        let mut stream = TouchTaskStream::new();
        stream.add_tap(10, Point::new(5, 5), 20).unwrap();
        assert_eq!(actions(&stream), vec![TouchAction::Down, TouchAction::Up]);
        assert_eq!(stream.tasks()[0].at_ns, 10 * NANOS_PER_MS);
        assert_eq!(stream.tasks()[1].at_ns, 30 * NANOS_PER_MS);
    }

    #[test]
    fn test_two_taps_chain() {
        let mut stream = TouchTaskStream::new();
        stream
            .add_tap(0, Point::new(100, 100), 20)
            .unwrap()
            .add_tap(50, Point::new(100, 100), 20)
            .unwrap();
        assert_eq!(stream.len(), 4);
    }

    #[test]
    fn test_leading_move_rejected() {
        let mut stream = TouchTaskStream::new();
        let err = stream.add_task(TouchAction::Move, Point::new(0, 0), 0).unwrap_err();
        assert!(matches!(err, TouchError::InvalidSequence(_)));
        assert!(stream.is_empty());
    }

    #[test]
    fn test_sequence_rules() {
        let p = Point::new(0, 0);
        let mut stream = TouchTaskStream::new();
        stream.add_task(TouchAction::Down, p, 0).unwrap();
        assert!(stream.add_task(TouchAction::Down, p, 1).is_err());
        stream.add_task(TouchAction::Up, p, 2).unwrap();
        assert!(stream.add_task(TouchAction::Up, p, 3).is_err());
        assert!(stream.add_task(TouchAction::Move, p, 3).is_err());
        assert!(stream.add_task(TouchAction::Down, p, 1).is_err());
        stream.add_task(TouchAction::Down, p, 4).unwrap();
        assert_eq!(stream.len(), 3);
    }

    #[test]
    fn test_rejected_batch_leaves_stream_unchanged() {
        let mut stream = TouchTaskStream::new();
        stream.add_tap(0, Point::new(1, 1), 10).unwrap();
        let motion = SlideMotion::new(30, 10).without_down();
        assert!(stream.add_slide(20, Point::new(0, 0), Point::new(0, 50), motion).is_err());
        assert_eq!(stream.len(), 2);
    }

    #[test]
    fn test_linear_slide_steps() {
        let mut stream = TouchTaskStream::new();
        stream
            .add_slide(0, Point::new(0, 0), Point::new(100, 0), SlideMotion::new(100, 10))
            .unwrap();
        let moves: Vec<i32> = stream
            .tasks()
            .iter()
            .filter(|t| t.action == TouchAction::Move)
            .map(|t| t.pos.x)
            .collect();
        assert_eq!(moves, vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
        assert_eq!(stream.last_at_ns(), Some(100 * NANOS_PER_MS));
    }

    #[test]
    fn test_hold_with_end_flick() {
        let mut stream = TouchTaskStream::new();
        stream.add_task(TouchAction::Down, Point::new(300, 567), 0).unwrap();
        stream
            .add_slide(
                500,
                Point::new(300, 567),
                Point::new(300, 367),
                SlideMotion::new(30, 1).without_down(),
            )
            .unwrap();
        assert_eq!(stream.tasks().first().unwrap().action, TouchAction::Down);
        assert_eq!(stream.tasks().last().unwrap().action, TouchAction::Up);
        assert!(!stream.ends_down());
    }

    #[test]
    fn test_invalid_slide_parameters() {
        let mut stream = TouchTaskStream::new();
        let p = Point::new(0, 0);
        assert!(stream.add_slide(0, p, p, SlideMotion::new(0, 1)).is_err());
        assert!(stream.add_slide(0, p, p, SlideMotion::new(10, 0)).is_err());
        assert!(stream
            .add_slide(0, p, p, SlideMotion::new(10, 1).eased(f64::NAN, 1.0))
            .is_err());
        assert!(stream.add_tap(0, p, -1).is_err());
    }

    #[test]
    fn test_cursor() {
        let mut stream = TouchTaskStream::new();
        stream.add_tap(0, Point::new(0, 0), 5).unwrap();
        assert_eq!(stream.next_task().unwrap().action, TouchAction::Down);
        stream.advance();
        assert_eq!(stream.remaining(), 1);
        stream.advance();
        assert!(stream.is_finished());
        stream.advance();
        assert!(stream.next_task().is_none());
    }

    proptest! {
        #[test]
        fn prop_curve_endpoints_exact(s0 in -5.0f64..5.0, s1 in -5.0f64..5.0) {
            prop_assert_eq!(ease_curve(0.0, s0, s1), 0.0);
            prop_assert_eq!(ease_curve(1.0, s0, s1), 1.0);
        }

        #[test]
        fn prop_slide_hits_endpoints(
            fx in -500i32..500, fy in -500i32..500,
            tx in -500i32..500, ty in -500i32..500,
            duration in 1i64..300, step in 1i64..50,
            s0 in 0.0f64..3.0, s1 in 0.0f64..3.0,
        ) {
            let from = Point::new(fx, fy);
            let to = Point::new(tx, ty);
            let mut stream = TouchTaskStream::new();
            stream.add_slide(0, from, to, SlideMotion::new(duration, step).eased(s0, s1)).unwrap();
            let tasks = stream.tasks();
            prop_assert_eq!(tasks[0].pos, from);
            prop_assert_eq!(tasks[tasks.len() - 2].pos, to);
            prop_assert_eq!(tasks[tasks.len() - 1].pos, to);
        }

        #[test]
        fn prop_builders_keep_invariant(
            gestures in proptest::collection::vec((0u8..2, 0i64..100, 1i64..60), 1..12),
        ) {
            let mut stream = TouchTaskStream::new();
            let mut t = 0;
            for (kind, gap, duration) in gestures {
                t += gap;
                let p = Point::new(t as i32, 10);
                if kind == 0 {
                    stream.add_tap(t, p, duration).unwrap();
                } else {
                    stream.add_slide(t, p, p.offset(0, -200), SlideMotion::new(duration, 5)).unwrap();
                }
                t += duration;
            }
            let mut down = false;
            let mut prev = i64::MIN;
            for (i, task) in stream.tasks().iter().enumerate() {
                match task.action {
                    TouchAction::Down => { prop_assert!(!down); down = true; }
                    TouchAction::Move => prop_assert!(down),
                    TouchAction::Up => { prop_assert!(down); down = false; }
                }
                if i == 0 { prop_assert_eq!(task.action, TouchAction::Down); }
                prop_assert!(task.at_ns >= prev);
                prev = task.at_ns;
            }
            prop_assert!(!down);
        }
    }
}
