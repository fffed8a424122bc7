//! Touch Controller
//!
//! Synchronous touch calls plus ownership of the slot pool. Executors
//! created from a controller share its pool and sink, so direct menu taps
//! and scheduled gestures never hand out the same slot twice.
//!
//! Every held slot records who pressed it. Only that owner can move or lift
//! it, so a stale Up from one component can never release a slot another
//! component has since been given.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::{Result, SlotId, TouchError, TouchExecutor, TouchSink};
use crate::config::TouchConfig;
use crate::geometry::Point;
use crate::utils::MetricsCollector;

/// Component that pressed a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotOwner {
    /// Direct calls on the controller
    Direct,
    /// The executor with this id
    Executor(u64),
}

impl fmt::Display for SlotOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Executor(id) => write!(f, "executor #{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Held {
    pos: Point,
    owner: SlotOwner,
}

/// Slot bookkeeping and the sink, guarded together
struct Shared<S> {
    sink: S,
    free: VecDeque<SlotId>,
    active: HashMap<SlotId, Held>,
    capacity: usize,
    next_executor: u64,
}

impl<S> Shared<S> {
    fn check_owner(&self, slot: SlotId, owner: SlotOwner) -> Result<()> {
        match self.active.get(&slot) {
            None => Err(TouchError::SlotNotHeld(slot)),
            Some(held) if held.owner != owner => Err(TouchError::SlotNotOwned { slot, owner: held.owner }),
            Some(_) => Ok(()),
        }
    }
}

/// Shared-ownership handle to a touch sink and its slot pool
///
/// Cloning is cheap; all clones see the same pool.
pub struct TouchController<S: TouchSink> {
    shared: Arc<Mutex<Shared<S>>>,
}

impl<S: TouchSink> Clone for TouchController<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S: TouchSink> TouchController<S> {
    /// Take ownership of `sink`; every supported slot starts free
    pub fn new(sink: S) -> Self {
        let mut free = VecDeque::new();
        for slot in sink.supported_slots() {
            if !free.contains(&slot) {
                free.push_back(slot);
            }
        }
        let capacity = free.len();
        debug!("Touch controller ready with {} slot(s)", capacity);

        Self {
            shared: Arc::new(Mutex::new(Shared {
                sink,
                free,
                active: HashMap::new(),
                capacity,
                next_executor: 0,
            })),
        }
    }

    /// Press a free slot at `pos`
    pub fn touch_down(&self, pos: Point) -> Result<SlotId> {
        self.acquire(SlotOwner::Direct, pos)
    }

    /// Lift a slot pressed with [`touch_down`](Self::touch_down)
    pub fn touch_up(&self, slot: SlotId) -> Result<()> {
        self.release(SlotOwner::Direct, slot)
    }

    /// Move a slot pressed with [`touch_down`](Self::touch_down)
    pub fn touch_move(&self, slot: SlotId, pos: Point) -> Result<()> {
        self.move_slot(SlotOwner::Direct, slot, pos)
    }

    pub(crate) fn acquire(&self, owner: SlotOwner, pos: Point) -> Result<SlotId> {
        let mut shared = self.shared.lock();
        let slot = shared.free.pop_front().ok_or(TouchError::NoFreeSlot {
            capacity: shared.capacity,
        })?;
        if let Err(e) = shared.sink.touch_down(slot, pos) {
            shared.free.push_front(slot);
            return Err(e);
        }
        shared.active.insert(slot, Held { pos, owner });
        trace!("Slot {} down at ({}, {}) for {}", slot, pos.x, pos.y, owner);
        Ok(slot)
    }

    pub(crate) fn release(&self, owner: SlotOwner, slot: SlotId) -> Result<()> {
        let mut shared = self.shared.lock();
        shared.check_owner(slot, owner)?;
        // The slot is released even when the backend fails, so the pool
        // cannot leak.
        let result = shared.sink.touch_up(slot);
        shared.active.remove(&slot);
        shared.free.push_back(slot);
        trace!("Slot {} up", slot);
        result
    }

    pub(crate) fn move_slot(&self, owner: SlotOwner, slot: SlotId, pos: Point) -> Result<()> {
        let mut shared = self.shared.lock();
        shared.check_owner(slot, owner)?;
        shared.sink.touch_move(slot, pos)?;
        if let Some(held) = shared.active.get_mut(&slot) {
            held.pos = pos;
        }
        Ok(())
    }

    /// Press and release at `pos`, blocking for `duration`
    pub fn tap(&self, pos: Point, duration: Duration) -> Result<()> {
        let slot = self.touch_down(pos)?;
        std::thread::sleep(duration);
        self.touch_up(slot)
    }

    /// Lift every held slot, whoever pressed it
    ///
    /// Owners that still believe they hold a lifted slot get
    /// [`TouchError::SlotNotHeld`] or [`TouchError::SlotNotOwned`] on their
    /// next call for it instead of touching the new holder's finger.
    pub fn release_all(&self) {
        let mut shared = self.shared.lock();
        let mut held: Vec<(SlotId, SlotOwner)> = shared.active.iter().map(|(s, h)| (*s, h.owner)).collect();
        held.sort_unstable_by_key(|(s, _)| *s);
        for (slot, owner) in held {
            if owner != SlotOwner::Direct {
                warn!("Lifting slot {} still held by {}", slot, owner);
            }
            if let Err(e) = shared.sink.touch_up(slot) {
                warn!("Failed to lift slot {}: {}", slot, e);
            }
            shared.active.remove(&slot);
            shared.free.push_back(slot);
        }
    }

    /// Lift `owner`'s slots among `slots`, skipping any it no longer holds
    pub(crate) fn release_slots(&self, owner: SlotOwner, slots: impl IntoIterator<Item = SlotId>) {
        for slot in slots {
            match self.release(owner, slot) {
                Ok(()) | Err(TouchError::SlotNotHeld(_)) | Err(TouchError::SlotNotOwned { .. }) => {}
                Err(e) => warn!("Failed to lift slot {}: {}", slot, e),
            }
        }
    }

    /// Owner identity for a new executor
    pub(crate) fn register_executor(&self) -> SlotOwner {
        let mut shared = self.shared.lock();
        let id = shared.next_executor;
        shared.next_executor += 1;
        SlotOwner::Executor(id)
    }

    /// Positions of every held slot, sorted by slot id
    pub fn current_touch_points(&self) -> Vec<(SlotId, Point)> {
        let shared = self.shared.lock();
        let mut points: Vec<_> = shared.active.iter().map(|(s, h)| (*s, h.pos)).collect();
        points.sort_unstable_by_key(|(s, _)| *s);
        points
    }

    /// Who holds `slot`, if anyone
    pub fn slot_owner(&self, slot: SlotId) -> Option<SlotOwner> {
        self.shared.lock().active.get(&slot).map(|h| h.owner)
    }

    /// Number of slots the sink supports
    pub fn capacity(&self) -> usize {
        self.shared.lock().capacity
    }

    /// Number of slots currently free
    pub fn free_slots(&self) -> usize {
        self.shared.lock().free.len()
    }

    /// Run `f` with exclusive access to the sink
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.shared.lock().sink)
    }
}

impl<S: TouchSink + 'static> TouchController<S> {
    /// Create an executor that schedules against this controller's pool
    pub fn create_executor(&self, config: &TouchConfig, metrics: Option<Arc<MetricsCollector>>) -> TouchExecutor<S> {
        TouchExecutor::new(self.clone(), config, metrics)
    }
}
