//! Auto Player
//!
//! The main loop: recognize the screen, navigate menus, and play songs.
//!
//! # States
//!
//! ```text
//!          ┌──────────── session ends ─────────────┐
//!          ▼                                        │
//!   ┌──────────┐  menu screen  ┌──────┐             │
//!   │   Idle   │──────────────▶│ Menu │             │
//!   └────┬─────┘◀──────────────└──┬───┘             │
//!        │        nothing matched │                 │
//!        │ song start / playing   │                 │
//!        ▼                        ▼                 │
//!   chart supplied and chart mode?                  │
//!        │ yes                    │ no              │
//!   ┌────▼──────┐          ┌──────▼─────┐           │
//!   │ ChartPlay │          │  LivePlay  │───────────┘
//!   └───────────┘          └────────────┘
//! ```
//!
//! Every tick captures a fresh frame. A screen must be recognized on
//! `debounce_count` consecutive ticks before the loop acts on it. Sessions
//! end when the alive/dead check fails, when the chart has been played out,
//! or when the player is stopped. With `max_sessions` set, the loop exits
//! after that many sessions.
//!
//! # Cleanup
//!
//! Hold fingers and the session executor are released by guards, so
//! every slot is lifted when a session ends for any reason, including an
//! error or a panic. The loop thread additionally releases the whole slot
//! pool on exit.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use super::chart::{align_base_time, build_program, Chart};
use super::menu::{MenuAction, MenuNavigator, MULTI_PLAY_START, SOLO_PLAY_START, SONG_RESULT};
use super::sample::{Resolution, SampleTracker, TrackerParams};
use super::{PlayerError, Result};
use crate::capture::{self, CaptureError, Frame, FrameCache, FrameSource};
use crate::config::{Config, DetectionConfig, GestureConfig, PlayConfig};
use crate::estimator::NoteTimeEstimator;
use crate::geometry::HrLine;
use crate::touch::{SlideMotion, SlotId, TouchController, TouchExecutor, TouchSink, TouchTaskStream};
use crate::utils::{metric_names, MetricsCollector, Timer};
use crate::vision::{Color, HoldType, Note, NoteColor, NoteFinder, StateLibrary};

/// Screen shown right before the notes start
pub const SONG_START: &str = "song_start";
/// Screen shown while a song is running
pub const SONG_PLAYING: &str = "song_playing";

/// Screens the main loop looks for
const WATCHED_STATES: [&str; 5] = [SONG_START, SONG_PLAYING, MULTI_PLAY_START, SOLO_PLAY_START, SONG_RESULT];

/// Player state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerState {
    /// Nothing recognized
    Idle,
    /// On a song selection or result screen
    Menu,
    /// Playing a pre-compiled chart
    ChartPlay,
    /// Playing from live note detection
    LivePlay,
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Menu => "menu",
            Self::ChartPlay => "chart-play",
            Self::LivePlay => "live-play",
        };
        f.write_str(s)
    }
}

/// Why a play session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The dead color appeared at the alive point
    SongEnded,
    /// The alive color was missing for too many checks
    AliveLost,
    /// Every chart gesture was played
    ChartFinished,
    /// The player was stopped
    Stopped,
}

/// Progress notifications
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    /// The loop thread started
    Started,
    /// The player state changed
    StateChanged {
        /// Previous state
        from: PlayerState,
        /// New state
        to: PlayerState,
    },
    /// The menu navigator acted on a screen
    Menu(MenuAction),
    /// A live note gesture was scheduled
    NoteDispatched {
        /// Note class
        color: NoteColor,
        /// Averaged hit time (ms from the session epoch)
        hit_time_ms: i64,
        /// Averaged hit x (pixels)
        x: i32,
    },
    /// A live note was skipped for lack of observations
    NoteDropped {
        /// Note class
        color: NoteColor,
        /// Observations collected
        samples: u32,
    },
    /// Chart time was anchored to the first detected note
    ChartAligned {
        /// Detected hit time minus chart time of the first note (ms)
        offset_ms: i64,
    },
    /// A play session ended
    SessionFinished(SessionEnd),
    /// Capture failed and a reconnect is being attempted
    CaptureLost {
        /// Attempt number, starting at 1
        attempt: u32,
    },
    /// The loop thread exited
    Stopped,
}

/// Result of sampling the alive point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Alive color present
    Alive,
    /// Dead color present
    Dead,
    /// Neither
    Unknown,
}

/// Sample the alive point of `frame`
pub fn liveness(frame: &Frame, detection: &DetectionConfig) -> Liveness {
    match frame.pixel(detection.alive_point).map(Color::from) {
        Some(c) if c.matches(detection.alive_color, detection.alive_color_delta) => Liveness::Alive,
        Some(c) if c.matches(detection.dead_color, detection.alive_color_delta) => Liveness::Dead,
        _ => Liveness::Unknown,
    }
}

/// Rate-limited alive/dead check that decides when a session is over
struct AliveMonitor {
    detection: DetectionConfig,
    interval: Duration,
    last_check: Option<Instant>,
    misses: u32,
}

impl AliveMonitor {
    fn new(detection: &DetectionConfig) -> Self {
        Self {
            detection: detection.clone(),
            interval: Duration::from_millis(detection.alive_check_interval_ms),
            last_check: None,
            misses: 0,
        }
    }

    /// Check `frame` if the interval has elapsed; `Some` ends the session
    fn poll(&mut self, frame: &Frame) -> Option<SessionEnd> {
        if self.last_check.is_some_and(|t| t.elapsed() < self.interval) {
            return None;
        }
        self.last_check = Some(Instant::now());

        match liveness(frame, &self.detection) {
            Liveness::Alive => {
                self.misses = 0;
                None
            }
            Liveness::Dead => Some(SessionEnd::SongEnded),
            Liveness::Unknown => {
                self.misses += 1;
                trace!("Alive check missed ({}/{})", self.misses, self.detection.alive_miss_limit);
                (self.misses >= self.detection.alive_miss_limit).then_some(SessionEnd::AliveLost)
            }
        }
    }
}

/// Outcome of feeding one recognition result to the debouncer
#[derive(Debug, Clone, PartialEq, Eq)]
enum Screen {
    /// The recognition changed recently
    Unsettled,
    /// Nothing has been recognized for long enough
    Unknown,
    /// The named screen has been recognized for long enough
    Known(String),
}

/// Requires a recognition result to repeat before it is acted on
#[derive(Debug)]
struct Debouncer {
    required: u32,
    candidate: Option<String>,
    count: u32,
}

impl Debouncer {
    fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            candidate: None,
            count: 0,
        }
    }

    fn update(&mut self, observed: Option<&str>) -> Screen {
        if self.candidate.as_deref() == observed {
            self.count = self.count.saturating_add(1);
        } else {
            self.candidate = observed.map(str::to_string);
            self.count = 1;
        }

        if self.count < self.required {
            return Screen::Unsettled;
        }
        match &self.candidate {
            Some(name) => Screen::Known(name.clone()),
            None => Screen::Unknown,
        }
    }

    fn reset(&mut self) {
        self.candidate = None;
        self.count = 0;
    }
}

/// Fingers kept pressed along the hit line from the first detected note to
/// the end of the live session
struct HoldFingers<S: TouchSink> {
    controller: TouchController<S>,
    slots: Vec<SlotId>,
}

impl<S: TouchSink> HoldFingers<S> {
    /// Press one finger at the center of each of `count` hit line segments
    fn press(controller: TouchController<S>, hit_line: &HrLine, count: usize) -> Self {
        let mut slots = Vec::with_capacity(count);
        for segment in hit_line.split(count) {
            match controller.touch_down(segment.pos_of(0.5)) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    warn!("Could not press hold finger {}/{}: {}", slots.len() + 1, count, e);
                    break;
                }
            }
        }
        debug!("Pressed {} hold finger(s)", slots.len());
        Self { controller, slots }
    }
}

impl<S: TouchSink> Drop for HoldFingers<S> {
    fn drop(&mut self) {
        for slot in self.slots.drain(..) {
            if let Err(e) = self.controller.touch_up(slot) {
                warn!("Failed to lift hold finger {}: {}", slot, e);
            }
        }
    }
}

/// Build the gesture for a live-detected note
///
/// | note                   | gesture | extra bias                |
/// |------------------------|---------|---------------------------|
/// | hold end with flick    | flick   | `hold_end_slide_delay_ms` |
/// | hold end               | none    |                           |
/// | flick                  | flick   | `slide_delay_ms`          |
/// | hold begin             | tap     | `hold_delay_ms`           |
/// | anything else          | tap     |                           |
///
/// Every gesture is also shifted by `live_hit_delay_ms`.
pub fn live_gesture(note: &Note, play: &PlayConfig, gesture: &GestureConfig) -> Result<Option<TouchTaskStream>> {
    let at = note.hit_time_ms + play.live_hit_delay_ms;
    let pos = note.hit_pos;
    let flick = SlideMotion::new(gesture.slide_duration_ms, gesture.slide_step_delay_ms);
    let flick_to = pos.offset(0, gesture.slide_move_dy);

    let mut stream = TouchTaskStream::new();
    match (note.hold, note.is_slide) {
        (HoldType::HoldEnd, true) => {
            stream.add_slide(at + gesture.hold_end_slide_delay_ms, pos, flick_to, flick)?;
        }
        (HoldType::HoldEnd, false) => return Ok(None),
        (_, true) => {
            stream.add_slide(at + gesture.slide_delay_ms, pos, flick_to, flick)?;
        }
        (HoldType::HoldBegin, false) => {
            stream.add_tap(at + gesture.hold_delay_ms, pos, gesture.tap_duration_ms)?;
        }
        (HoldType::None, false) => {
            stream.add_tap(at, pos, gesture.tap_duration_ms)?;
        }
    }
    Ok(Some(stream))
}

fn sleep_remaining(start: Instant, period: Duration) {
    if let Some(rest) = period.checked_sub(start.elapsed()) {
        thread::sleep(rest);
    }
}

/// Lifts every slot and reports the exit, however the loop ends
struct ExitGuard<S: TouchSink> {
    controller: TouchController<S>,
    events: Sender<PlayerEvent>,
}

impl<S: TouchSink> Drop for ExitGuard<S> {
    fn drop(&mut self) {
        self.controller.release_all();
        let _ = self.events.send(PlayerEvent::Stopped);
        info!("Auto player stopped");
    }
}

/// The single-threaded player loop
///
/// [`AutoPlayer`] runs this on its own thread; tests and tools can drive it
/// directly.
pub struct PlayerLoop<F: FrameSource, S: TouchSink + 'static> {
    config: Config,
    frames: FrameCache<F>,
    controller: TouchController<S>,
    states: StateLibrary,
    estimator: Arc<NoteTimeEstimator>,
    chart: Option<Chart>,
    metrics: Option<Arc<MetricsCollector>>,
    events: Sender<PlayerEvent>,
    debouncer: Debouncer,
    navigator: MenuNavigator<S>,
    state: PlayerState,
    sessions: u32,
}

impl<F: FrameSource, S: TouchSink + 'static> PlayerLoop<F, S> {
    /// Create a loop in the idle state
    pub fn new(
        config: Config,
        source: F,
        controller: TouchController<S>,
        states: StateLibrary,
        metrics: Option<Arc<MetricsCollector>>,
        events: Sender<PlayerEvent>,
    ) -> Self {
        let estimator = Arc::new(NoteTimeEstimator::new(
            config.play.speed,
            config.track.check_upper_y,
            config.track.check_lower_y,
        ));
        let navigator = MenuNavigator::new(
            controller.clone(),
            config.play.max_difficulty,
            Duration::from_millis(config.touch.menu_tap_duration_ms),
        );
        Self {
            debouncer: Debouncer::new(config.play.debounce_count),
            frames: FrameCache::new(source),
            controller,
            states,
            estimator,
            chart: None,
            metrics,
            events,
            navigator,
            state: PlayerState::Idle,
            sessions: 0,
            config,
        }
    }

    /// Replace the chart used when chart mode is on
    pub fn set_chart(&mut self, chart: Option<Chart>) {
        self.chart = chart;
    }

    /// Current state
    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// The touch controller
    pub fn controller(&self) -> &TouchController<S> {
        &self.controller
    }

    /// The note time estimator
    pub fn estimator(&self) -> &Arc<NoteTimeEstimator> {
        &self.estimator
    }

    /// Frames captured so far
    pub fn frames_captured(&self) -> u64 {
        self.frames.capture_count()
    }

    /// Play sessions finished so far
    pub fn sessions_played(&self) -> u32 {
        self.sessions
    }

    fn session_limit_reached(&self) -> bool {
        self.config.play.max_sessions.is_some_and(|max| self.sessions >= max)
    }

    /// Run ticks until `running` is cleared, the frame source runs out,
    /// `max_sessions` sessions have been played, or an error occurs
    pub fn run(&mut self, running: &AtomicBool) -> Result<()> {
        let _guard = ExitGuard {
            controller: self.controller.clone(),
            events: self.events.clone(),
        };
        info!(
            "Auto player started (speed {}, chart mode {})",
            self.config.play.speed,
            self.config.play.chart_mode && self.chart.is_some()
        );
        self.emit(PlayerEvent::Started);

        let period = Duration::from_millis(self.config.play.main_loop_delay_ms);
        while running.load(Ordering::Acquire) {
            let start = Instant::now();
            match self.tick(running) {
                Ok(()) => {}
                Err(PlayerError::Capture(CaptureError::Exhausted)) => {
                    info!("Frame source exhausted");
                    break;
                }
                Err(e) => {
                    error!("Auto player failed: {}", e);
                    return Err(e);
                }
            }
            if self.session_limit_reached() {
                info!("Played {} session(s), stopping", self.sessions);
                break;
            }
            sleep_remaining(start, period);
        }
        Ok(())
    }

    /// One pass of the main loop
    ///
    /// Recognizes the current screen and, once it is settled, navigates the
    /// menu or plays a full session before returning.
    pub fn tick(&mut self, running: &AtomicBool) -> Result<()> {
        let frame = self.fresh_frame()?;
        let observed = self.recognize(&frame);

        match self.debouncer.update(observed.as_deref()) {
            Screen::Unsettled => {}
            Screen::Unknown => self.set_state(PlayerState::Idle),
            Screen::Known(screen) if screen == SONG_START || screen == SONG_PLAYING => {
                self.play(running)?;
                self.debouncer.reset();
            }
            Screen::Known(screen) => {
                self.set_state(PlayerState::Menu);
                if self.config.play.auto_select {
                    let action = self.navigator.act(&frame, self.states.get(&screen)?)?;
                    if action != MenuAction::None {
                        self.emit(PlayerEvent::Menu(action));
                        self.debouncer.reset();
                    }
                }
            }
        }
        Ok(())
    }

    /// Play one session, chart-driven if chart mode is on and a chart is set
    pub fn play(&mut self, running: &AtomicBool) -> Result<SessionEnd> {
        let chart = match (&self.chart, self.config.play.chart_mode) {
            (Some(chart), true) => Some(chart.clone()),
            _ => None,
        };
        let end = match chart {
            Some(chart) => {
                self.set_state(PlayerState::ChartPlay);
                self.run_chart_session(&chart, running)
            }
            None => {
                self.set_state(PlayerState::LivePlay);
                self.run_live_session(running)
            }
        };
        self.set_state(PlayerState::Idle);

        let end = end?;
        info!("Play session finished: {:?}", end);
        self.sessions += 1;
        self.record(|m| m.increment_counter(metric_names::SESSIONS_FINISHED, 1));
        self.emit(PlayerEvent::SessionFinished(end));
        Ok(end)
    }

    /// Play from live note detection until the session ends
    pub fn run_live_session(&mut self, running: &AtomicBool) -> Result<SessionEnd> {
        let play = self.config.play.clone();
        let detection = self.config.detection.clone();
        let gesture = self.config.gesture.clone();

        let executor = self.new_executor();
        executor.start()?;
        let mut finder = NoteFinder::new(
            Arc::clone(&self.estimator),
            &self.config.track,
            &detection,
            executor.base_time(),
        );
        let mut tracker = SampleTracker::new(TrackerParams::from_config(
            &detection,
            &self.estimator,
            play.check_loop_delay_ms,
        ));
        debug!(
            "Live session: {} observation(s) per note, dispatch window {}ms",
            tracker.params().min_samples,
            tracker.params().window_ms
        );
        let hit_line = finder.hit_line();
        let mut hold: Option<HoldFingers<S>> = None;
        let mut alive = AliveMonitor::new(&detection);

        let period = Duration::from_millis(play.check_loop_delay_ms);
        let staleness = Some(Duration::from_millis(detection.frame_max_staleness_ms));
        let end = loop {
            if !running.load(Ordering::Acquire) {
                break SessionEnd::Stopped;
            }
            let start = Instant::now();
            let frame = self.next_frame(staleness)?;
            if let Some(end) = alive.poll(&frame) {
                break end;
            }

            let timer = Timer::new();
            let notes = finder.find_all_notes(&frame);
            self.record(|m| m.record_histogram(metric_names::DETECT_MS, timer.elapsed_ms()));

            tracker.observe(&notes);
            if hold.is_none() && !tracker.samples().is_empty() {
                hold = Some(HoldFingers::press(self.controller.clone(), &hit_line, play.hold_cnt));
            }
            self.record(|m| m.set_gauge(metric_names::PENDING_SAMPLES, tracker.pending() as f64));
            for resolution in tracker.take_due(executor.now_ms()) {
                self.resolve(&executor, resolution, &play, &gesture)?;
            }
            self.record(|m| m.increment_counter(metric_names::PLAYER_TICKS, 1));
            sleep_remaining(start, period);
        };

        executor.shutdown(end == SessionEnd::Stopped);
        drop(hold);
        Ok(end)
    }

    fn resolve(
        &self,
        executor: &TouchExecutor<S>,
        resolution: Resolution,
        play: &PlayConfig,
        gesture: &GestureConfig,
    ) -> Result<()> {
        match resolution {
            Resolution::Dispatch(note) => {
                if let Some(stream) = live_gesture(&note, play, gesture)? {
                    trace!(
                        "Dispatching {} note at x={} hit={}ms ({:?})",
                        note.color,
                        note.hit_pos.x,
                        note.hit_time_ms,
                        note.hold
                    );
                    executor.execute(stream)?;
                }
                self.record(|m| m.increment_counter(metric_names::NOTES_DISPATCHED, 1));
                self.emit(PlayerEvent::NoteDispatched {
                    color: note.color,
                    hit_time_ms: note.hit_time_ms,
                    x: note.hit_pos.x,
                });
            }
            Resolution::Drop { note, count } => {
                debug!(
                    "Dropping {} note at x={} hit={}ms: {} observation(s)",
                    note.color, note.hit_pos.x, note.hit_time_ms, count
                );
                self.record(|m| m.increment_counter(metric_names::NOTES_DROPPED, 1));
                self.emit(PlayerEvent::NoteDropped {
                    color: note.color,
                    samples: count,
                });
            }
        }
        Ok(())
    }

    /// Play a chart, anchored to the first detected note
    pub fn run_chart_session(&mut self, chart: &Chart, running: &AtomicBool) -> Result<SessionEnd> {
        let Some(first_ms) = chart.first_time_ms() else {
            warn!("Chart has no notes");
            return Ok(SessionEnd::ChartFinished);
        };
        let detection = self.config.detection.clone();
        let period = Duration::from_millis(self.config.play.check_loop_delay_ms);
        let staleness = Some(Duration::from_millis(detection.frame_max_staleness_ms));

        let executor = self.new_executor();
        let mut finder = NoteFinder::new(
            Arc::clone(&self.estimator),
            &self.config.track,
            &detection,
            executor.base_time(),
        );
        let program = build_program(
            chart,
            &finder.hit_line(),
            &self.config.gesture,
            self.config.play.chart_hit_delay_ms,
        )?;
        let mut alive = AliveMonitor::new(&detection);

        let detected_ms = loop {
            if !running.load(Ordering::Acquire) {
                return Ok(SessionEnd::Stopped);
            }
            let start = Instant::now();
            let frame = self.next_frame(staleness)?;
            if let Some(end) = alive.poll(&frame) {
                return Ok(end);
            }
            let first = finder
                .find_all_notes(&frame)
                .iter()
                .flat_map(|(_, notes)| notes.iter().map(|n| n.hit_time_ms))
                .min();
            if let Some(hit_ms) = first {
                break hit_ms;
            }
            sleep_remaining(start, period);
        };

        executor.set_base_time(align_base_time(finder.epoch(), detected_ms, first_ms));
        info!(
            "Chart aligned: first note hits {}ms after session start ({} stream(s))",
            detected_ms,
            program.len()
        );
        self.emit(PlayerEvent::ChartAligned {
            offset_ms: detected_ms - first_ms,
        });
        for stream in program {
            executor.execute(stream)?;
        }
        executor.start()?;

        let end = loop {
            if !running.load(Ordering::Acquire) {
                break SessionEnd::Stopped;
            }
            if executor.is_idle() {
                break SessionEnd::ChartFinished;
            }
            let start = Instant::now();
            let frame = self.next_frame(staleness)?;
            if let Some(end) = alive.poll(&frame) {
                break end;
            }
            self.record(|m| m.increment_counter(metric_names::PLAYER_TICKS, 1));
            sleep_remaining(start, period);
        };

        executor.shutdown(end == SessionEnd::Stopped);
        Ok(end)
    }

    fn new_executor(&self) -> TouchExecutor<S> {
        self.controller.create_executor(&self.config.touch, self.metrics.clone())
    }

    fn recognize(&self, frame: &Frame) -> Option<String> {
        if let Some(state) = self
            .states
            .match_any(&WATCHED_STATES, frame, self.config.detection.min_psnr)
        {
            return Some(state.name().to_string());
        }
        // Without a template for the playing screen the alive point stands in
        let alive = liveness(frame, &self.config.detection) == Liveness::Alive;
        (!self.states.contains(SONG_PLAYING) && alive).then(|| SONG_PLAYING.to_string())
    }

    /// Frame no older than `max_staleness`
    fn next_frame(&mut self, max_staleness: Option<Duration>) -> Result<Frame> {
        self.fetch(|frames| frames.get_frame(max_staleness))
    }

    /// Newly captured frame
    fn fresh_frame(&mut self) -> Result<Frame> {
        self.fetch(FrameCache::capture)
    }

    /// Run `grab`, reconnecting the source on recoverable failures
    fn fetch(&mut self, mut grab: impl FnMut(&mut FrameCache<F>) -> capture::Result<Frame>) -> Result<Frame> {
        match grab(&mut self.frames) {
            Ok(frame) => Ok(frame),
            Err(e) if e.is_recoverable() => {
                warn!("Capture failed: {}", e);
                self.reconnect()?;
                Ok(grab(&mut self.frames)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn reconnect(&mut self) -> Result<()> {
        let attempts = self.config.touch.max_reconnect_attempts;
        let delay = Duration::from_millis(self.config.touch.reconnect_delay_ms);
        for attempt in 1..=attempts {
            self.emit(PlayerEvent::CaptureLost { attempt });
            thread::sleep(delay);
            match self.frames.reconnect() {
                Ok(()) => {
                    info!("Capture reconnected after {} attempt(s)", attempt);
                    return Ok(());
                }
                Err(e) => warn!("Reconnect attempt {}/{} failed: {}", attempt, attempts, e),
            }
        }
        Err(PlayerError::ReconnectFailed { attempts })
    }

    fn set_state(&mut self, to: PlayerState) {
        if self.state != to {
            debug!("Player state {} -> {}", self.state, to);
            self.emit(PlayerEvent::StateChanged { from: self.state, to });
            self.state = to;
        }
    }

    fn emit(&self, event: PlayerEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    fn record(&self, f: impl FnOnce(&MetricsCollector)) {
        if let Some(metrics) = &self.metrics {
            f(metrics);
        }
    }
}

/// Log player events on a background thread
///
/// The thread ends once every sender is gone (the [`AutoPlayer`] or
/// [`PlayerLoop`] has been dropped) and returns the number of events seen.
pub fn spawn_event_logger(events: Receiver<PlayerEvent>) -> Result<JoinHandle<u64>> {
    thread::Builder::new()
        .name("player-events".to_string())
        .spawn(move || {
            let mut seen = 0;
            for event in events.iter() {
                seen += 1;
                match event {
                    PlayerEvent::NoteDispatched { .. } | PlayerEvent::NoteDropped { .. } => {
                        trace!("Event: {:?}", event)
                    }
                    _ => info!("Event: {:?}", event),
                }
            }
            seen
        })
        .map_err(PlayerError::Spawn)
}

/// Runs a [`PlayerLoop`] on a dedicated thread
pub struct AutoPlayer<F: FrameSource + 'static, S: TouchSink + 'static> {
    idle: Option<PlayerLoop<F, S>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<(PlayerLoop<F, S>, Result<()>)>>,
    events: Receiver<PlayerEvent>,
}

impl<F: FrameSource + 'static, S: TouchSink + 'static> AutoPlayer<F, S> {
    /// Create a stopped player
    pub fn new(
        config: Config,
        source: F,
        controller: TouchController<S>,
        states: StateLibrary,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Self {
        let (tx, rx) = unbounded();
        Self {
            idle: Some(PlayerLoop::new(config, source, controller, states, metrics, tx)),
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            events: rx,
        }
    }

    /// Use `chart` for chart-driven sessions
    pub fn with_chart(mut self, chart: Chart) -> Self {
        if let Some(player) = self.idle.as_mut() {
            player.set_chart(Some(chart));
        }
        self
    }

    /// Receiver for player events
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.events.clone()
    }

    /// Start the loop thread
    pub fn start(&mut self) -> Result<()> {
        let Some(mut player) = self.idle.take() else {
            return Err(PlayerError::AlreadyRunning);
        };
        self.running.store(true, Ordering::Release);

        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("auto-player".to_string())
            .spawn(move || {
                let result = match catch_unwind(AssertUnwindSafe(|| player.run(&running))) {
                    Ok(result) => result,
                    Err(_) => {
                        error!("Auto player loop panicked");
                        Err(PlayerError::Panicked)
                    }
                };
                running.store(false, Ordering::Release);
                (player, result)
            })
            .map_err(PlayerError::Spawn)?;
        self.worker = Some(handle);
        Ok(())
    }

    /// Whether the loop thread is running
    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the loop and wait for it
    ///
    /// Returns the loop's own error, if it failed. The player can be started
    /// again afterwards.
    pub fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        self.join()
    }

    /// Wait for the loop to end on its own
    pub fn wait(&mut self) -> Result<()> {
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok((player, result)) => {
                self.idle = Some(player);
                result
            }
            Err(_) => Err(PlayerError::Panicked),
        }
    }
}

impl<F: FrameSource + 'static, S: TouchSink + 'static> Drop for AutoPlayer<F, S> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Auto player ended with error: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, Rect};
    use image::{Rgb, RgbImage};

    fn note(hold: HoldType, is_slide: bool) -> Note {
        Note {
            color: if is_slide { NoteColor::Red } else { NoteColor::Blue },
            bounding_box: Rect::new(0, 0, 10, 5),
            hit_pos: Point::new(400, 567),
            hit_time_ms: 1000,
            hold,
            is_slide,
        }
    }

    fn start_ms(stream: &TouchTaskStream) -> i64 {
        stream.first_at_ns().unwrap() / crate::touch::NANOS_PER_MS
    }

    #[test]
    fn test_live_gesture_table() {
        let play = PlayConfig::default();
        let g = GestureConfig::default();
        let base = 1000 + play.live_hit_delay_ms;

        let tap = live_gesture(&note(HoldType::None, false), &play, &g).unwrap().unwrap();
        assert_eq!(tap.len(), 2);
        assert_eq!(start_ms(&tap), base);

        let begin = live_gesture(&note(HoldType::HoldBegin, false), &play, &g).unwrap().unwrap();
        assert_eq!(start_ms(&begin), base + g.hold_delay_ms);

        let flick = live_gesture(&note(HoldType::None, true), &play, &g).unwrap().unwrap();
        assert_eq!(start_ms(&flick), base + g.slide_delay_ms);
        assert_eq!(flick.tasks().last().unwrap().pos, Point::new(400, 567 + g.slide_move_dy));

        let end_flick = live_gesture(&note(HoldType::HoldEnd, true), &play, &g).unwrap().unwrap();
        assert_eq!(start_ms(&end_flick), base + g.hold_end_slide_delay_ms);

        assert!(live_gesture(&note(HoldType::HoldEnd, false), &play, &g).unwrap().is_none());
    }

    #[test]
    fn test_debouncer() {
        let mut d = Debouncer::new(3);
        assert_eq!(d.update(Some("a")), Screen::Unsettled);
        assert_eq!(d.update(Some("a")), Screen::Unsettled);
        assert_eq!(d.update(Some("a")), Screen::Known("a".into()));
        assert_eq!(d.update(Some("b")), Screen::Unsettled);
        assert_eq!(d.update(None), Screen::Unsettled);
        assert_eq!(d.update(None), Screen::Unsettled);
        assert_eq!(d.update(None), Screen::Unknown);
        d.reset();
        assert_eq!(d.update(None), Screen::Unsettled);
    }

    fn frame_with(detection: &DetectionConfig, color: Color) -> Frame {
        let mut image = RgbImage::from_pixel(1280, 720, Rgb([0, 0, 0]));
        let p = detection.alive_point;
        image.put_pixel(p.x as u32, p.y as u32, color.into());
        Frame::new(image, Instant::now())
    }

    #[test]
    fn test_liveness() {
        let d = DetectionConfig::default();
        assert_eq!(liveness(&frame_with(&d, d.alive_color), &d), Liveness::Alive);
        assert_eq!(liveness(&frame_with(&d, d.dead_color), &d), Liveness::Dead);
        assert_eq!(liveness(&frame_with(&d, Color::new(1, 2, 3)), &d), Liveness::Unknown);
    }

    #[test]
    fn test_alive_monitor_miss_limit() {
        let mut d = DetectionConfig::default();
        d.alive_check_interval_ms = 0;
        d.alive_miss_limit = 2;
        let mut monitor = AliveMonitor::new(&d);
        let unknown = frame_with(&d, Color::new(1, 2, 3));
        assert_eq!(monitor.poll(&frame_with(&d, d.alive_color)), None);
        assert_eq!(monitor.poll(&unknown), None);
        assert_eq!(monitor.poll(&unknown), Some(SessionEnd::AliveLost));
        assert_eq!(monitor.poll(&frame_with(&d, d.dead_color)), Some(SessionEnd::SongEnded));
    }

    #[test]
    fn test_alive_monitor_rate_limited() {
        let mut d = DetectionConfig::default();
        d.alive_check_interval_ms = 60_000;
        let mut monitor = AliveMonitor::new(&d);
        assert_eq!(monitor.poll(&frame_with(&d, d.alive_color)), None);
        // Not checked again within the interval
        assert_eq!(monitor.poll(&frame_with(&d, d.dead_color)), None);
    }
}
