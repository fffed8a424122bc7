//! Screen Capture
//!
//! The capture backend is an external collaborator. This module defines the
//! capability it must provide ([`FrameSource`]), the immutable [`Frame`]
//! snapshot handed to detection, and a [`FrameCache`] that reuses the last
//! capture while it is fresh enough.
//!
//! ```text
//! FrameSource::capture() ──▶ FrameCache ──▶ Frame { image, captured_at }
//!                              │
//!                              └── get_frame(Some(10ms)) reuses a frame
//!                                  captured less than 10ms ago
//! ```

pub mod error;
pub mod image_dir;

pub use error::{CaptureError, Result};
pub use image_dir::ImageDirSource;

use image::{Rgb, RgbImage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::geometry::Point;

/// Capability of a screen capture backend
pub trait FrameSource: Send {
    /// Grab the current screen contents
    fn capture(&mut self) -> Result<RgbImage>;

    /// Display size as `(width, height)`
    fn display_size(&self) -> (u32, u32);

    /// Re-establish the connection after a failure
    fn reconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn capture(&mut self) -> Result<RgbImage> {
        (**self).capture()
    }

    fn display_size(&self) -> (u32, u32) {
        (**self).display_size()
    }

    fn reconnect(&mut self) -> Result<()> {
        (**self).reconnect()
    }
}

/// An immutable captured screen image
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbImage>,
    captured_at: Instant,
}

impl Frame {
    /// Wrap an image captured at `captured_at`
    pub fn new(image: RgbImage, captured_at: Instant) -> Self {
        Self {
            image: Arc::new(image),
            captured_at,
        }
    }

    /// The captured pixels
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// When the image was captured
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Time since capture
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Image width
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Image height
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Pixel at `p`, or `None` outside the image
    #[inline]
    pub fn pixel(&self, p: Point) -> Option<Rgb<u8>> {
        if p.x < 0 || p.y < 0 {
            return None;
        }
        self.image.get_pixel_checked(p.x as u32, p.y as u32).copied()
    }
}

/// Caches the most recent capture of a [`FrameSource`]
pub struct FrameCache<S: FrameSource> {
    source: S,
    last: Option<Frame>,
    captures: u64,
}

impl<S: FrameSource> FrameCache<S> {
    /// Wrap a frame source
    pub fn new(source: S) -> Self {
        Self {
            source,
            last: None,
            captures: 0,
        }
    }

    /// Capture a new frame unconditionally
    pub fn capture(&mut self) -> Result<Frame> {
        let image = self.source.capture()?;
        let frame = Frame::new(image, Instant::now());
        self.captures += 1;
        trace!("Captured frame #{} ({}x{})", self.captures, frame.width(), frame.height());
        self.last = Some(frame.clone());
        Ok(frame)
    }

    /// Get a frame, reusing the cached one when possible
    ///
    /// With `None` any cached frame is returned. With `Some(max)` the cached
    /// frame is returned only if it is at most `max` old; otherwise a new
    /// frame is captured.
    pub fn get_frame(&mut self, max_staleness: Option<Duration>) -> Result<Frame> {
        if let Some(frame) = &self.last {
            let fresh = max_staleness.map_or(true, |max| frame.age() <= max);
            if fresh {
                return Ok(frame.clone());
            }
        }
        self.capture()
    }

    /// Reconnect the underlying source and drop the cached frame
    pub fn reconnect(&mut self) -> Result<()> {
        debug!("Reconnecting frame source");
        self.last = None;
        self.source.reconnect()
    }

    /// Display size of the underlying source
    pub fn display_size(&self) -> (u32, u32) {
        self.source.display_size()
    }

    /// Number of captures taken so far
    pub fn capture_count(&self) -> u64 {
        self.captures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSource {
        calls: u32,
        fail: bool,
    }

    impl FrameSource for CountingSource {
        fn capture(&mut self) -> Result<RgbImage> {
            if self.fail {
                return Err(CaptureError::Disconnected);
            }
            self.calls += 1;
            Ok(RgbImage::from_pixel(4, 4, Rgb([self.calls as u8, 0, 0])))
        }

        fn display_size(&self) -> (u32, u32) {
            (4, 4)
        }

        fn reconnect(&mut self) -> Result<()> {
            self.fail = false;
            Ok(())
        }
    }

    #[test]
    fn test_get_frame_reuses_fresh_frame() {
        let mut cache = FrameCache::new(CountingSource { calls: 0, fail: false });
        let a = cache.get_frame(Some(Duration::from_secs(60))).unwrap();
        let b = cache.get_frame(Some(Duration::from_secs(60))).unwrap();
        assert_eq!(cache.capture_count(), 1);
        assert_eq!(a.captured_at(), b.captured_at());
    }

    #[test]
    fn test_get_frame_refreshes_stale_frame() {
        let mut cache = FrameCache::new(CountingSource { calls: 0, fail: false });
        cache.get_frame(None).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let frame = cache.get_frame(Some(Duration::from_millis(1))).unwrap();
        assert_eq!(cache.capture_count(), 2);
        assert_eq!(frame.pixel(Point::new(0, 0)), Some(Rgb([2, 0, 0])));
    }

    #[test]
    fn test_get_frame_without_bound_uses_cache() {
        let mut cache = FrameCache::new(CountingSource { calls: 0, fail: false });
        cache.capture().unwrap();
        std::thread::sleep(Duration::from_millis(2));
        cache.get_frame(None).unwrap();
        assert_eq!(cache.capture_count(), 1);
    }

    #[test]
    fn test_reconnect_after_failure() {
        let mut cache = FrameCache::new(CountingSource { calls: 0, fail: true });
        let err = cache.get_frame(None).unwrap_err();
        assert!(err.is_recoverable());
        cache.reconnect().unwrap();
        assert!(cache.get_frame(None).is_ok());
    }

    #[test]
    fn test_pixel_bounds() {
        let frame = Frame::new(RgbImage::new(2, 2), Instant::now());
        assert!(frame.pixel(Point::new(1, 1)).is_some());
        assert!(frame.pixel(Point::new(2, 0)).is_none());
        assert!(frame.pixel(Point::new(-1, 0)).is_none());
    }
}
