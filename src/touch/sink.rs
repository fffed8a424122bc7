//! Logging touch sink
//!
//! A backend that injects nothing. It logs every call and keeps a
//! timestamped record, for rehearsing gesture programs offline and for
//! tests.

use std::time::Instant;
use tracing::debug;

use super::{Result, SlotId, TouchAction, TouchSink};
use crate::geometry::Point;

/// One call received by a [`LoggingTouchSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkEvent {
    /// Call kind
    pub action: TouchAction,
    /// Slot addressed
    pub slot: SlotId,
    /// Position (None for Up)
    pub pos: Option<Point>,
    /// When the call arrived
    pub at: Instant,
}

/// Touch sink that records calls instead of injecting them
#[derive(Debug)]
pub struct LoggingTouchSink {
    slots: u32,
    events: Vec<SinkEvent>,
}

impl LoggingTouchSink {
    /// Sink supporting slots `0..slots`
    pub fn new(slots: u32) -> Self {
        Self {
            slots,
            events: Vec::new(),
        }
    }

    /// Every call received so far
    pub fn events(&self) -> &[SinkEvent] {
        &self.events
    }

    /// Take the recorded calls, leaving the record empty
    pub fn take_events(&mut self) -> Vec<SinkEvent> {
        std::mem::take(&mut self.events)
    }

    fn record(&mut self, action: TouchAction, slot: SlotId, pos: Option<Point>) {
        self.events.push(SinkEvent {
            action,
            slot,
            pos,
            at: Instant::now(),
        });
    }
}

impl TouchSink for LoggingTouchSink {
    fn touch_down(&mut self, slot: SlotId, pos: Point) -> Result<()> {
        debug!(slot, x = pos.x, y = pos.y, "touch down");
        self.record(TouchAction::Down, slot, Some(pos));
        Ok(())
    }

    fn touch_up(&mut self, slot: SlotId) -> Result<()> {
        debug!(slot, "touch up");
        self.record(TouchAction::Up, slot, None);
        Ok(())
    }

    fn touch_move(&mut self, slot: SlotId, pos: Point) -> Result<()> {
        debug!(slot, x = pos.x, y = pos.y, "touch move");
        self.record(TouchAction::Move, slot, Some(pos));
        Ok(())
    }

    fn supported_slots(&self) -> Vec<SlotId> {
        (0..self.slots).collect()
    }
}
