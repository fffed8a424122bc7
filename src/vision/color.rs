//! RGB reference colors and tolerance matching

use image::Rgb;
use serde::{Deserialize, Serialize};

/// An RGB color, serialized as `[r, g, b]`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color(pub [u8; 3]);

impl Color {
    /// Create a color from channel values
    #[inline]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }

    /// Per-channel tolerance match
    ///
    /// True when every channel differs by at most `delta`. The bound is
    /// inclusive.
    #[inline]
    pub fn matches(&self, other: Color, delta: u8) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .all(|(a, b)| a.abs_diff(*b) <= delta)
    }

    /// Squared euclidean distance
    #[inline]
    pub fn distance_sq(&self, other: Color) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| {
                let d = a.abs_diff(*b) as u32;
                d * d
            })
            .sum()
    }

    /// Index of the closest color in `palette`
    pub fn nearest(&self, palette: &[Color]) -> Option<usize> {
        palette
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| self.distance_sq(**c))
            .map(|(i, _)| i)
    }
}

impl From<Rgb<u8>> for Color {
    fn from(px: Rgb<u8>) -> Self {
        Self(px.0)
    }
}

impl From<Color> for Rgb<u8> {
    fn from(c: Color) -> Self {
        Rgb(c.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_boundary_is_inclusive() {
        let reference = Color::new(243, 243, 255);
        assert!(reference.matches(Color::new(246, 240, 252), 3));
        assert!(!reference.matches(Color::new(247, 243, 255), 3));
        assert!(!reference.matches(Color::new(243, 239, 255), 3));
    }

    #[test]
    fn test_zero_delta_requires_exact() {
        let c = Color::new(1, 2, 3);
        assert!(c.matches(c, 0));
        assert!(!c.matches(Color::new(1, 2, 4), 0));
    }

    #[test]
    fn test_nearest() {
        let palette = [Color::new(0, 0, 0), Color::new(255, 255, 255), Color::new(255, 0, 0)];
        assert_eq!(Color::new(200, 30, 20).nearest(&palette), Some(2));
        assert_eq!(Color::new(10, 10, 10).nearest(&palette), Some(0));
        assert_eq!(Color::new(10, 10, 10).nearest(&[]), None);
    }

    #[test]
    fn test_serde_as_array() {
        let json = serde_json::to_string(&Color::new(1, 2, 3)).unwrap();
        assert_eq!(json, "[1,2,3]");
    }
}
