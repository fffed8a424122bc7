//! Pixel-level screen analysis
//!
//! - [`color`]: reference colors and per-channel tolerance matching
//! - [`regions`]: the corridor mask and connected-region extraction
//! - [`note_finder`]: per-frame note detection
//! - [`states`]: screen-state templates compared by PSNR

pub mod color;
pub mod note_finder;
pub mod regions;
pub mod states;

pub use color::Color;
pub use note_finder::{HoldType, Note, NoteColor, NoteFinder};
pub use regions::CorridorMask;
pub use states::{StateLibrary, StateTemplate};

use thiserror::Error;

/// Result type for vision operations
pub type Result<T> = std::result::Result<T, VisionError>;

/// Vision module error types
#[derive(Error, Debug)]
pub enum VisionError {
    /// Requested state is not in the library
    #[error("Unknown screen state: {0}")]
    UnknownState(String),

    /// Requested button or point is not defined by the state
    #[error("State '{state}' has no {kind} named '{name}'")]
    MissingLocation {
        /// State name
        state: String,
        /// "button" or "point"
        kind: &'static str,
        /// Requested name
        name: String,
    },

    /// Template file name is not `<x>_<y>.png`
    #[error("Invalid template name: {0}")]
    InvalidTemplateName(String),

    /// Image decoding failed
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// State metadata is malformed
    #[error("Invalid state metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
