//! Timed Multi-Touch Scheduling
//!
//! Turns gestures into time-ordered touch actions and plays them against a
//! slot-limited touch backend.
//!
//! # Architecture
//!
//! ```text
//!  gesture builders           scheduling                backend
//! ┌──────────────────┐   ┌──────────────────────┐   ┌────────────┐
//! │ TouchTaskStream  │──▶│ TouchExecutor        │   │            │
//! │  add_tap         │   │  min-heap by         │   │ TouchSink  │
//! │  add_slide       │   │  (deadline, seq)     │──▶│  down/up/  │
//! └──────────────────┘   │  dedicated thread    │   │  move      │
//!                        └──────────┬───────────┘   │            │
//!  menu taps                        │ slots         │            │
//! ┌──────────────────┐   ┌──────────▼───────────┐   │            │
//! │ direct calls     │──▶│ TouchController      │──▶│            │
//! └──────────────────┘   │  slot pool + sink    │   └────────────┘
//!                        │  (one mutex)         │
//!                        └──────────────────────┘
//! ```
//!
//! # Slots
//!
//! A slot is one hardware multitouch contact. The controller owns the pool
//! and hands slots out in FIFO order. A slot belongs to exactly one holder
//! between its Down and its Up. A stream whose Down finds no free slot is
//! abandoned as a whole; nothing of it reaches the sink.
//!
//! # Time
//!
//! Task times are nanoseconds relative to the executor's base instant.
//! Builders take milliseconds.

pub mod controller;
pub mod error;
pub mod executor;
pub mod sink;
pub mod stream;

pub use controller::{SlotOwner, TouchController};
pub use error::{Result, TouchError};
pub use executor::TouchExecutor;
pub use sink::{LoggingTouchSink, SinkEvent};
pub use stream::{ease_curve, SlideMotion, TouchTaskStream};

use std::fmt;

use crate::geometry::Point;

/// Hardware multitouch contact identifier
pub type SlotId = u32;

/// Nanoseconds per millisecond
pub const NANOS_PER_MS: i64 = 1_000_000;

/// One touch action kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TouchAction {
    /// Finger down
    Down,
    /// Finger moves while down
    Move,
    /// Finger lifted
    Up,
}

impl fmt::Display for TouchAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Down => "down",
            Self::Move => "move",
            Self::Up => "up",
        };
        f.write_str(s)
    }
}

/// A timed touch action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TouchTask {
    /// What to do
    pub action: TouchAction,
    /// Where (ignored by Up)
    pub pos: Point,
    /// When, in ns relative to the executor base time
    pub at_ns: i64,
}

/// Capability of a raw touch backend
///
/// Calls for one slot always arrive as Down, zero or more Moves, then Up.
pub trait TouchSink: Send {
    /// Press slot `slot` at `pos`
    fn touch_down(&mut self, slot: SlotId, pos: Point) -> Result<()>;

    /// Lift slot `slot`
    fn touch_up(&mut self, slot: SlotId) -> Result<()>;

    /// Move the pressed slot `slot` to `pos`
    fn touch_move(&mut self, slot: SlotId, pos: Point) -> Result<()>;

    /// Slot ids the backend supports, in preferred allocation order
    fn supported_slots(&self) -> Vec<SlotId>;
}

impl<T: TouchSink + ?Sized> TouchSink for Box<T> {
    fn touch_down(&mut self, slot: SlotId, pos: Point) -> Result<()> {
        (**self).touch_down(slot, pos)
    }

    fn touch_up(&mut self, slot: SlotId) -> Result<()> {
        (**self).touch_up(slot)
    }

    fn touch_move(&mut self, slot: SlotId, pos: Point) -> Result<()> {
        (**self).touch_move(slot, pos)
    }

    fn supported_slots(&self) -> Vec<SlotId> {
        (**self).supported_slots()
    }
}
