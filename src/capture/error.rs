//! Capture Error Types

use std::path::PathBuf;
use thiserror::Error;

/// Result type for capture operations
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Capture module error types
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The capture backend reported a failure
    #[error("Capture backend error: {0}")]
    Backend(String),

    /// The device is gone and must be reconnected
    #[error("Capture device disconnected")]
    Disconnected,

    /// A finite source has no frames left
    #[error("Frame source exhausted")]
    Exhausted,

    /// Directory contained no usable frames
    #[error("No frames found in {0}")]
    NoFrames(PathBuf),

    /// Frame has unexpected dimensions
    #[error("Frame size {got_width}x{got_height} does not match display {width}x{height}")]
    SizeMismatch {
        /// Display width
        width: u32,
        /// Display height
        height: u32,
        /// Captured width
        got_width: u32,
        /// Captured height
        got_height: u32,
    },

    /// Image decoding failed
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Whether a reconnect may fix this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Disconnected | Self::Io(_))
    }
}
