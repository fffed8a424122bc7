//! # rhythm-autoplay
//!
//! Screen-driven auto player for lane-based rhythm games.
//!
//! Frames of the game screen are scanned for notes inside a detection
//! corridor. Each note's remaining travel time is estimated from its row,
//! observations are tracked across frames, and a timed multi-touch
//! scheduler plays the matching gesture on the hit line. Alternatively a
//! pre-resolved chart is compiled into gestures up front and anchored to
//! the first detected note.
//!
//! # Architecture
//!
//! ```text
//! rhythm-autoplay
//!   ├─> Capture (frame sources, short-lived frame cache)
//!   ├─> Vision (corridor scan, note finder, screen-state templates)
//!   ├─> Estimator (row → time-until-hit lookup table)
//!   ├─> Player (sample tracking, charts, menus, main loop)
//!   └─> Touch (gesture streams, timed executor, slot-owning controller)
//! ```
//!
//! # Data Flow
//!
//! **Live Path:** Frame → NoteFinder → SampleTracker → TouchTaskStream → TouchExecutor → TouchSink
//!
//! **Chart Path:** Chart → TouchTaskStream program → (aligned base time) → TouchExecutor → TouchSink
//!
//! **Menu Path:** Frame → StateLibrary → MenuNavigator → TouchController → TouchSink

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Configuration loading and validation
pub mod config;

/// Lines, points and the lane trapezoid
pub mod geometry;

/// Note travel time estimation
pub mod estimator;

/// Frame sources and the frame cache
pub mod capture;

/// Note detection and screen-state recognition
///
/// Notes are found as connected regions of reference colors inside the
/// detection corridor. Screen states are recognized by PSNR against small
/// template images.
pub mod vision;

/// Timed multi-touch scheduling
///
/// Gesture programs ([`touch::TouchTaskStream`]) are merged by a dedicated
/// executor thread into one time-ordered dispatch against a slot-limited
/// touch backend.
pub mod touch;

/// Sample tracking, charts, menus and the main loop
pub mod player;

/// Utility functions
pub mod utils;
