//! Play logic
//!
//! - [`sample`]: cross-frame tracking of detected notes
//! - [`chart`]: chart files and their compilation into touch streams
//! - [`menu`]: song selection screens
//! - [`auto_player`]: the main loop and its thread

use thiserror::Error;

pub mod auto_player;
pub mod chart;
pub mod menu;
pub mod sample;

pub use auto_player::{
    live_gesture, spawn_event_logger, AutoPlayer, Liveness, PlayerEvent, PlayerLoop, PlayerState, SessionEnd,
};
pub use chart::{Chart, ChartHold, ChartNote, ChartStep, FlickKind};
pub use menu::{MenuAction, MenuNavigator, SongDifficulty, SongStatus};
pub use sample::{NoteSample, Resolution, SampleTracker, TrackerParams};

use crate::capture::CaptureError;
use crate::touch::TouchError;
use crate::vision::VisionError;

/// Result type for player operations
pub type Result<T> = std::result::Result<T, PlayerError>;

/// Player error types
#[derive(Error, Debug)]
pub enum PlayerError {
    /// Frame capture failed
    #[error("Capture failed: {0}")]
    Capture(#[from] CaptureError),

    /// Touch scheduling failed
    #[error("Touch failed: {0}")]
    Touch(#[from] TouchError),

    /// Screen state lookup failed
    #[error("Screen state error: {0}")]
    Vision(#[from] VisionError),

    /// Chart content is invalid
    #[error("Invalid chart: {0}")]
    Chart(String),

    /// Chart JSON is malformed
    #[error("Chart parse error: {0}")]
    ChartParse(#[from] serde_json::Error),

    /// Chart file could not be read
    #[error("Chart I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Every reconnect attempt failed
    #[error("Capture reconnect failed after {attempts} attempt(s)")]
    ReconnectFailed {
        /// Attempts made
        attempts: u32,
    },

    /// `start` was called on a running player
    #[error("Auto player already running")]
    AlreadyRunning,

    /// The loop thread could not be spawned
    #[error("Failed to spawn auto player thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// The loop thread panicked
    #[error("Auto player loop panicked")]
    Panicked,
}
