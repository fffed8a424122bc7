//! Image-directory frame source
//!
//! Replays previously captured screenshots, in file name order, as if they
//! came from the device. Used for offline detection runs and tests.

use image::RgbImage;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{CaptureError, FrameSource, Result};

/// Frame source backed by a directory of image files
pub struct ImageDirSource {
    frames: Vec<PathBuf>,
    next: usize,
    looping: bool,
    size: (u32, u32),
}

impl ImageDirSource {
    /// Collect all `png`, `jpg`, `jpeg` and `bmp` files in `dir`
    ///
    /// The display size is taken from the first frame.
    pub fn open(dir: impl AsRef<Path>, looping: bool) -> Result<Self> {
        let dir = dir.as_ref();
        let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image_file(path))
            .collect();
        frames.sort();

        Self::from_files(frames, looping).map_err(|e| match e {
            CaptureError::Exhausted => CaptureError::NoFrames(dir.to_path_buf()),
            other => other,
        })
    }

    /// Replay an explicit list of files
    pub fn from_files(frames: Vec<PathBuf>, looping: bool) -> Result<Self> {
        let first = frames.first().ok_or(CaptureError::Exhausted)?;
        let size = image::image_dimensions(first)?;
        info!("Replaying {} frame(s) at {}x{}", frames.len(), size.0, size.1);

        Ok(Self {
            frames,
            next: 0,
            looping,
            size,
        })
    }

    /// Number of frames available
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the source has no frames
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for ImageDirSource {
    fn capture(&mut self) -> Result<RgbImage> {
        if self.next >= self.frames.len() {
            if !self.looping {
                return Err(CaptureError::Exhausted);
            }
            self.next = 0;
        }
        let path = &self.frames[self.next];
        self.next += 1;
        debug!("Loading frame {}", path.display());

        let image = image::open(path)?.to_rgb8();
        if image.dimensions() != self.size {
            return Err(CaptureError::SizeMismatch {
                width: self.size.0,
                height: self.size.1,
                got_width: image.width(),
                got_height: image.height(),
            });
        }
        Ok(image)
    }

    fn display_size(&self) -> (u32, u32) {
        self.size
    }

    fn reconnect(&mut self) -> Result<()> {
        self.next = 0;
        Ok(())
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg" | "bmp"))
        .unwrap_or(false)
}
