//! Screen Geometry Primitives
//!
//! Integer pixel geometry shared by detection and touch scheduling.
//!
//! # Lane Perspective
//!
//! The track is drawn as a trapezoid: narrow near the top of the screen and
//! wide at the bottom. A position on one horizontal scan line maps to the
//! proportionally equivalent position on another:
//!
//! ```text
//!            upper_len
//!          ┌───────────┐          row dy
//!         /      •      \         note at row y   (HrLine a)
//!        /       │       \
//!       /        ▼        \
//!      /─────────•─────────\      hit line        (HrLine b)
//!     └─────────────────────┘     row dy + height
//!             lower_len
//!
//! b.pos_of_from(a, p) = b.pos + (b.length * (p.x - a.pos.x) / a.length, 0)
//! ```

use serde::{Deserialize, Serialize};

use crate::config::TrackConfig;

/// A pixel position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    /// Column
    pub x: i32,
    /// Row
    pub y: i32,
}

impl Point {
    /// Create a new point
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Offset this point by `(dx, dy)`
    #[inline]
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }
}

/// An axis-aligned pixel rectangle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    /// Left column
    pub x: i32,
    /// Top row
    pub y: i32,
    /// Width in pixels
    pub width: i32,
    /// Height in pixels
    pub height: i32,
}

impl Rect {
    /// Create a new rectangle
    #[inline]
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center point (rounded towards the top-left)
    #[inline]
    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Row just below the rectangle
    #[inline]
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// Column just right of the rectangle
    #[inline]
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Check if this rectangle contains a point
    #[inline]
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x < self.right() && p.y >= self.y && p.y < self.bottom()
    }
}

/// A horizontal line segment on one scan row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HrLine {
    /// Left end point
    pub pos: Point,
    /// Length in pixels
    pub length: i32,
}

impl HrLine {
    /// Create a new line
    #[inline]
    pub const fn new(pos: Point, length: i32) -> Self {
        Self { pos, length }
    }

    /// Left end point
    #[inline]
    pub fn left(&self) -> Point {
        self.pos
    }

    /// Right end point
    #[inline]
    pub fn right(&self) -> Point {
        self.pos.offset(self.length, 0)
    }

    /// Split into `n` equal segments
    ///
    /// Segment `i` starts at `pos.x + length * i / n` on the same row and is
    /// `length / n` long, so the segments never cover more than the parent.
    /// Returns an empty list for `n == 0`.
    pub fn split(&self, n: usize) -> Vec<HrLine> {
        if n == 0 {
            return Vec::new();
        }
        let n = n as i64;
        let len = (self.length as i64 / n) as i32;
        (0..n)
            .map(|i| {
                let x = self.pos.x as i64 + self.length as i64 * i / n;
                HrLine::new(Point::new(x as i32, self.pos.y), len)
            })
            .collect()
    }

    /// Point at fraction `t` along the line
    #[inline]
    pub fn pos_of(&self, t: f64) -> Point {
        self.pos.offset((self.length as f64 * t) as i32, 0)
    }

    /// Map `p`, which lies on `other`, to the proportional point on this line
    pub fn pos_of_from(&self, other: &HrLine, p: Point) -> Point {
        if other.length == 0 {
            return self.pos;
        }
        let dx = self.length as i64 * (p.x - other.pos.x) as i64 / other.length as i64;
        self.pos.offset(dx as i32, 0)
    }
}

/// Trapezoidal track shape derived from [`TrackConfig`]
#[derive(Debug, Clone, Copy)]
pub struct TrackGeometry {
    upper_len: i32,
    lower_len: i32,
    height: i32,
    dx: i32,
    dy: i32,
}

impl TrackGeometry {
    /// Build the track shape
    pub fn new(config: &TrackConfig) -> Self {
        Self {
            upper_len: config.upper_len,
            lower_len: config.lower_len,
            height: config.height.max(1),
            dx: config.dx,
            dy: config.dy,
        }
    }

    /// The track's horizontal extent on screen row `y`
    pub fn line_at(&self, y: i32) -> HrLine {
        let rows_above_bottom = (self.dy + self.height - y) as i64;
        let a = ((self.lower_len - self.upper_len) as i64 * rows_above_bottom
            / self.height as i64) as i32;
        HrLine::new(Point::new(self.dx + a / 2, y), self.lower_len - a)
    }
}
