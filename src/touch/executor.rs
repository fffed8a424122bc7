//! Touch Executor
//!
//! One dedicated thread that merges many gesture programs into a single
//! time-ordered dispatch against a shared [`TouchController`].
//!
//! # Scheduling
//!
//! Submitted streams sit in a min-heap keyed by the time of their next
//! pending action, ties broken by submission order:
//!
//! ```text
//!   heap top ─▶ (t=120ms, #3) ─ stream C, action 2/4
//!               (t=120ms, #5) ─ stream E, action 1/2
//!               (t=180ms, #1) ─ stream A, action 3/3
//! ```
//!
//! The loop sleeps on a condvar until shortly before the top deadline, then
//! yields/spins the last `spin_margin_us`. Once the deadline passes it pops
//! the top stream, runs one action, and pushes the stream back keyed by its
//! next action. Everything already due is dispatched without sleeping again.
//! Submitting a stream that is due before the current top wakes the loop.
//!
//! # Lifecycle
//!
//! | call              | queued streams                 | held slots          |
//! |-------------------|--------------------------------|---------------------|
//! | `stop()`          | all run to completion          | lifted at exit      |
//! | `shutdown(false)` | only those already started run | lifted at exit      |
//! | `shutdown(true)`  | discarded                      | lifted immediately  |
//! | drop              | same as `shutdown(true)`       |                     |
//!
//! Slots are lifted by a guard on the loop thread, so a panic in a sink call
//! still leaves every finger up.
//!
//! A stream being dispatched is off the heap while the queue lock is
//! released; [`TouchExecutor::is_idle`] counts it as in flight, so callers
//! never see an empty executor between two actions of the same stream.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use super::{
    Result, SlotId, SlotOwner, TouchAction, TouchController, TouchError, TouchSink, TouchTaskStream, NANOS_PER_MS,
};
use crate::config::TouchConfig;
use crate::utils::{metric_names, MetricsCollector};

/// Below this remaining time the spin phase busy-waits instead of yielding
const SPIN_YIELD_THRESHOLD: Duration = Duration::from_micros(50);

/// A queued stream keyed by its next action
struct Pending {
    at_ns: i64,
    seq: u64,
    stream: TouchTaskStream,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.at_ns == other.at_ns && self.seq == other.seq
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    // Reversed: BinaryHeap is a max-heap and the earliest action must win
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at_ns
            .cmp(&self.at_ns)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Accepting and dispatching
    Open,
    /// Finish every queued stream, then exit
    Draining,
    /// Finish streams that already started, drop the rest, then exit
    Finishing,
    /// Exit now
    Halted,
}

struct Queue {
    heap: BinaryHeap<Pending>,
    base: Instant,
    next_seq: u64,
    mode: Mode,
    held: HashSet<SlotId>,
    in_flight: usize,
}

impl Queue {
    fn deadline(&self, at_ns: i64) -> Instant {
        if at_ns >= 0 {
            self.base + Duration::from_nanos(at_ns as u64)
        } else {
            self.base
                .checked_sub(Duration::from_nanos(at_ns.unsigned_abs()))
                .unwrap_or(self.base)
        }
    }
}

/// What one dispatched action did to the stream's slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Done,
    Pressed(SlotId),
    Lifted(SlotId),
    Abandoned,
}

struct Inner<S: TouchSink> {
    controller: TouchController<S>,
    owner: SlotOwner,
    queue: Mutex<Queue>,
    wakeup: Condvar,
    poll: Duration,
    spin_margin: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

/// Background scheduler for gesture programs
pub struct TouchExecutor<S: TouchSink + 'static> {
    inner: Arc<Inner<S>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: TouchSink + 'static> TouchExecutor<S> {
    /// Create a stopped executor; the base time is now
    pub fn new(controller: TouchController<S>, config: &TouchConfig, metrics: Option<Arc<MetricsCollector>>) -> Self {
        let owner = controller.register_executor();
        Self {
            inner: Arc::new(Inner {
                controller,
                owner,
                queue: Mutex::new(Queue {
                    heap: BinaryHeap::new(),
                    base: Instant::now(),
                    next_seq: 0,
                    mode: Mode::Open,
                    held: HashSet::new(),
                    in_flight: 0,
                }),
                wakeup: Condvar::new(),
                poll: Duration::from_millis(config.shutdown_poll_ms.max(1)),
                spin_margin: Duration::from_micros(config.spin_margin_us),
                metrics,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Start the scheduling thread
    ///
    /// Returns `false` if it was already running. A stopped executor can be
    /// started again.
    pub fn start(&self) -> Result<bool> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(false);
        }
        self.inner.queue.lock().mode = Mode::Open;

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("touch-executor".to_string())
            .spawn(move || {
                if catch_unwind(AssertUnwindSafe(|| run_loop(&inner))).is_err() {
                    error!("Touch executor loop panicked; all held slots were lifted");
                }
            })?;
        *worker = Some(handle);

        info!("Touch executor started");
        Ok(true)
    }

    /// Whether the scheduling thread is running
    pub fn is_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Submit a gesture program
    ///
    /// The executor takes ownership; the stream's times are relative to the
    /// base time at dispatch.
    pub fn execute(&self, stream: TouchTaskStream) -> Result<()> {
        let Some(first) = stream.next_task() else {
            return Err(TouchError::InvalidParameter("cannot execute an empty stream".into()));
        };
        let at_ns = first.at_ns;

        let mut queue = self.inner.queue.lock();
        if queue.mode != Mode::Open {
            return Err(TouchError::ExecutorStopped);
        }
        let wake = queue.heap.peek().map_or(true, |top| at_ns < top.at_ns);
        let seq = queue.next_seq;
        queue.next_seq += 1;
        trace!("Queued stream #{} ({} actions, first at {}ns)", seq, stream.len(), at_ns);
        queue.heap.push(Pending { at_ns, seq, stream });
        drop(queue);

        if wake {
            self.inner.wakeup.notify_one();
        }
        Ok(())
    }

    /// Rebase every future action onto `base`
    pub fn set_base_time(&self, base: Instant) {
        self.inner.queue.lock().base = base;
        self.inner.wakeup.notify_one();
        debug!("Touch executor base time moved");
    }

    /// Instant that task time 0 refers to
    pub fn base_time(&self) -> Instant {
        self.inner.queue.lock().base
    }

    /// Current time in ms relative to the base time
    pub fn now_ms(&self) -> i64 {
        let base = self.base_time();
        let now = Instant::now();
        match now.checked_duration_since(base) {
            Some(d) => (d.as_nanos() as i64) / NANOS_PER_MS,
            None => -((base - now).as_nanos() as i64) / NANOS_PER_MS,
        }
    }

    /// Number of queued streams
    pub fn pending_streams(&self) -> usize {
        self.inner.queue.lock().heap.len()
    }

    /// Whether nothing is queued, being dispatched, or holding a slot
    pub fn is_idle(&self) -> bool {
        let queue = self.inner.queue.lock();
        queue.heap.is_empty() && queue.in_flight == 0 && queue.held.is_empty()
    }

    /// Slots currently held by this executor
    pub fn held_slots(&self) -> Vec<SlotId> {
        let mut held: Vec<_> = self.inner.queue.lock().held.iter().copied().collect();
        held.sort_unstable();
        held
    }

    /// The controller this executor dispatches through
    pub fn controller(&self) -> &TouchController<S> {
        &self.inner.controller
    }

    /// Finish every queued stream, then stop the thread
    pub fn stop(&self) {
        let running = self.worker.lock().is_some();
        {
            let mut queue = self.inner.queue.lock();
            if !running {
                queue.heap.clear();
                queue.mode = Mode::Halted;
            } else if queue.mode == Mode::Open {
                queue.mode = Mode::Draining;
            }
        }
        self.inner.wakeup.notify_all();
        self.join();
        self.finish_shutdown();
    }

    /// Stop the thread, discarding work
    ///
    /// With `force == false`, streams that have already dispatched an action
    /// run to their end; the rest are dropped. With `force == true` everything is discarded and
    /// every held slot is lifted right away.
    pub fn shutdown(&self, force: bool) {
        let running = self.worker.lock().is_some();
        {
            let mut queue = self.inner.queue.lock();
            let before = queue.heap.len();
            if force || !running {
                queue.heap.clear();
                queue.mode = Mode::Halted;
            } else {
                queue.heap.retain(|p| p.stream.has_started());
                if queue.mode != Mode::Halted {
                    queue.mode = Mode::Finishing;
                }
            }
            let dropped = before - queue.heap.len();
            if dropped > 0 {
                debug!("Discarded {} queued stream(s) on shutdown", dropped);
            }
        }
        self.inner.wakeup.notify_all();
        self.join();
        self.finish_shutdown();
    }

    fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("Touch executor thread panicked during shutdown");
            }
        }
    }

    fn finish_shutdown(&self) {
        let held: Vec<SlotId> = {
            let mut queue = self.inner.queue.lock();
            queue.mode = Mode::Halted;
            queue.heap.clear();
            queue.held.drain().collect()
        };
        self.inner.controller.release_slots(self.inner.owner, held);
    }
}

impl<S: TouchSink + 'static> Drop for TouchExecutor<S> {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}

/// Lifts held slots and halts the queue however the loop exits
struct ExitGuard<'a, S: TouchSink> {
    inner: &'a Inner<S>,
}

impl<S: TouchSink> Drop for ExitGuard<'_, S> {
    fn drop(&mut self) {
        let held: Vec<SlotId> = {
            let mut queue = self.inner.queue.lock();
            queue.mode = Mode::Halted;
            queue.heap.clear();
            queue.in_flight = 0;
            queue.held.drain().collect()
        };
        if !held.is_empty() {
            debug!("Lifting {} slot(s) still held at executor exit", held.len());
        }
        self.inner.controller.release_slots(self.inner.owner, held);
        info!("Touch executor stopped");
    }
}

fn run_loop<S: TouchSink>(inner: &Inner<S>) {
    let _guard = ExitGuard { inner };
    let mut queue = inner.queue.lock();

    loop {
        if queue.mode == Mode::Halted {
            break;
        }
        let Some(next_ns) = queue.heap.peek().map(|p| p.at_ns) else {
            if matches!(queue.mode, Mode::Draining | Mode::Finishing) {
                break;
            }
            inner.wakeup.wait_for(&mut queue, inner.poll);
            continue;
        };

        let deadline = queue.deadline(next_ns);
        let now = Instant::now();
        if deadline > now {
            let remaining = deadline - now;
            if remaining > inner.spin_margin {
                let wait = (remaining - inner.spin_margin).min(inner.poll);
                inner.wakeup.wait_for(&mut queue, wait);
            } else {
                MutexGuard::unlocked(&mut queue, || spin_until(deadline));
            }
            continue;
        }

        let Some(mut pending) = queue.heap.pop() else {
            continue;
        };
        queue.in_flight += 1;
        let lateness = now.saturating_duration_since(deadline);
        let outcome = MutexGuard::unlocked(&mut queue, || dispatch(inner, &mut pending.stream, lateness));
        queue.in_flight -= 1;

        match outcome {
            Outcome::Pressed(slot) => {
                queue.held.insert(slot);
            }
            Outcome::Lifted(slot) => {
                queue.held.remove(&slot);
            }
            Outcome::Done | Outcome::Abandoned => {}
        }
        if outcome == Outcome::Abandoned || queue.mode == Mode::Halted {
            continue;
        }
        if let Some(next) = pending.stream.next_task() {
            pending.at_ns = next.at_ns;
            queue.heap.push(pending);
        }
    }
}

fn dispatch<S: TouchSink>(inner: &Inner<S>, stream: &mut TouchTaskStream, lateness: Duration) -> Outcome {
    let Some(task) = stream.next_task().copied() else {
        return Outcome::Done;
    };

    let outcome = match task.action {
        TouchAction::Down => match inner.controller.acquire(inner.owner, task.pos) {
            Ok(slot) => {
                stream.set_slot(Some(slot));
                Outcome::Pressed(slot)
            }
            Err(e) => {
                warn!(
                    "Abandoning gesture at ({}, {}): {} ({} action(s) dropped)",
                    task.pos.x,
                    task.pos.y,
                    e,
                    stream.remaining()
                );
                if let Some(metrics) = &inner.metrics {
                    metrics.increment_counter(metric_names::STREAMS_ABANDONED, 1);
                }
                return Outcome::Abandoned;
            }
        },
        TouchAction::Move => {
            match stream.slot() {
                Some(slot) => {
                    if let Err(e) = inner.controller.move_slot(inner.owner, slot, task.pos) {
                        warn!("Touch move on slot {} failed: {}", slot, e);
                    }
                }
                None => trace!("Move without a slot ignored"),
            }
            Outcome::Done
        }
        TouchAction::Up => match stream.slot() {
            Some(slot) => {
                if let Err(e) = inner.controller.release(inner.owner, slot) {
                    warn!("Touch up on slot {} failed: {}", slot, e);
                }
                stream.set_slot(None);
                Outcome::Lifted(slot)
            }
            None => Outcome::Done,
        },
    };
    stream.advance();

    if let Some(metrics) = &inner.metrics {
        metrics.increment_counter(metric_names::ACTIONS_DISPATCHED, 1);
        metrics.record_histogram(metric_names::DISPATCH_LATENESS_US, lateness.as_secs_f64() * 1_000_000.0);
    }
    outcome
}

fn spin_until(deadline: Instant) {
    loop {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        if deadline - now > SPIN_YIELD_THRESHOLD {
            thread::yield_now();
        } else {
            std::hint::spin_loop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;
    use crate::touch::LoggingTouchSink;

    fn executor(slots: u32) -> TouchExecutor<LoggingTouchSink> {
        let controller = TouchController::new(LoggingTouchSink::new(slots));
        controller.create_executor(&TouchConfig::default(), None)
    }

    fn tap_at(ms: i64, x: i32) -> TouchTaskStream {
        let mut stream = TouchTaskStream::new();
        stream.add_tap(ms, Point::new(x, 0), 5).unwrap();
        stream
    }

    #[test]
    fn test_heap_order_breaks_ties_by_submission() {
        let mut heap = BinaryHeap::new();
        heap.push(Pending { at_ns: 10, seq: 2, stream: TouchTaskStream::new() });
        heap.push(Pending { at_ns: 10, seq: 1, stream: TouchTaskStream::new() });
        heap.push(Pending { at_ns: 5, seq: 3, stream: TouchTaskStream::new() });
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|p| p.seq)).collect();
        assert_eq!(order, vec![3, 1, 2]);
    }

    #[test]
    fn test_empty_stream_rejected() {
        let executor = executor(2);
        assert!(matches!(
            executor.execute(TouchTaskStream::new()),
            Err(TouchError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_stop_drains_queue() {
        let executor = executor(2);
        executor.start().unwrap();
        executor.execute(tap_at(5, 1)).unwrap();
        executor.execute(tap_at(15, 2)).unwrap();
        executor.stop();

        let events = executor.controller().with_sink(|s| s.take_events());
        assert_eq!(events.len(), 4);
        assert!(matches!(executor.execute(tap_at(0, 3)), Err(TouchError::ExecutorStopped)));
    }

    #[test]
    fn test_force_shutdown_discards_and_lifts() {
        let executor = executor(2);
        let mut hold = TouchTaskStream::new();
        hold.add_task(TouchAction::Down, Point::new(1, 1), 0).unwrap();
        hold.add_task(TouchAction::Up, Point::new(1, 1), 10_000).unwrap();
        executor.start().unwrap();
        executor.execute(hold).unwrap();
        executor.execute(tap_at(5_000, 2)).unwrap();

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(executor.held_slots().len(), 1);
        executor.shutdown(true);

        assert!(executor.held_slots().is_empty());
        assert!(executor.controller().current_touch_points().is_empty());
        let actions: Vec<TouchAction> = executor
            .controller()
            .with_sink(|s| s.events().iter().map(|e| e.action).collect());
        assert_eq!(actions, vec![TouchAction::Down, TouchAction::Up]);
    }

    #[test]
    fn test_graceful_shutdown_finishes_pressed_streams() {
        let executor = executor(2);
        let mut hold = TouchTaskStream::new();
        hold.add_task(TouchAction::Down, Point::new(1, 1), 0).unwrap();
        hold.add_task(TouchAction::Move, Point::new(2, 1), 60).unwrap();
        hold.add_task(TouchAction::Up, Point::new(2, 1), 80).unwrap();
        executor.start().unwrap();
        executor.execute(hold).unwrap();
        executor.execute(tap_at(5_000, 9)).unwrap();

        std::thread::sleep(Duration::from_millis(20));
        executor.shutdown(false);

        let actions: Vec<TouchAction> = executor
            .controller()
            .with_sink(|s| s.events().iter().map(|e| e.action).collect());
        assert_eq!(actions, vec![TouchAction::Down, TouchAction::Move, TouchAction::Up]);
    }

    #[test]
    fn test_graceful_shutdown_keeps_started_multi_tap() {
        let executor = executor(2);
        let mut taps = TouchTaskStream::new();
        taps.add_tap(0, Point::new(1, 1), 5).unwrap();
        taps.add_tap(60, Point::new(1, 1), 5).unwrap();
        executor.start().unwrap();
        executor.execute(taps).unwrap();

        // Between the two taps: the stream holds no slot
        std::thread::sleep(Duration::from_millis(30));
        assert!(executor.held_slots().is_empty());
        assert!(!executor.is_idle());
        executor.shutdown(false);

        let actions: Vec<TouchAction> = executor
            .controller()
            .with_sink(|s| s.events().iter().map(|e| e.action).collect());
        assert_eq!(
            actions,
            vec![TouchAction::Down, TouchAction::Up, TouchAction::Down, TouchAction::Up]
        );
        assert!(executor.is_idle());
    }

    #[test]
    fn test_executor_slots_are_not_lifted_directly() {
        let executor = executor(1);
        let mut press = TouchTaskStream::new();
        press.add_task(TouchAction::Down, Point::new(4, 4), 0).unwrap();
        press.add_task(TouchAction::Up, Point::new(4, 4), 10_000).unwrap();
        executor.start().unwrap();
        executor.execute(press).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        let slot = executor.held_slots()[0];
        assert!(matches!(
            executor.controller().touch_up(slot),
            Err(TouchError::SlotNotOwned { .. })
        ));
        executor.shutdown(true);
        assert_eq!(executor.controller().free_slots(), 1);
    }

    #[test]
    fn test_stream_left_down_is_lifted_on_stop() {
        let executor = executor(1);
        let mut press = TouchTaskStream::new();
        press.add_task(TouchAction::Down, Point::new(4, 4), 0).unwrap();
        executor.start().unwrap();
        executor.execute(press).unwrap();
        executor.stop();
        assert_eq!(executor.controller().free_slots(), 1);
    }

    #[test]
    fn test_set_base_time_delays_dispatch() {
        let executor = executor(1);
        executor.set_base_time(Instant::now() + Duration::from_secs(30));
        executor.start().unwrap();
        executor.execute(tap_at(0, 1)).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert!(executor.controller().with_sink(|s| s.events().is_empty()));
        assert_eq!(executor.pending_streams(), 1);
        assert!(executor.now_ms() < -29_000);
    }

    #[test]
    fn test_restart_after_stop() {
        let executor = executor(1);
        executor.start().unwrap();
        assert!(!executor.start().unwrap());
        executor.stop();
        assert!(executor.start().unwrap());
        executor.set_base_time(Instant::now());
        executor.execute(tap_at(1, 1)).unwrap();
        executor.stop();
        assert_eq!(executor.controller().with_sink(|s| s.events().len()), 2);
    }
}
