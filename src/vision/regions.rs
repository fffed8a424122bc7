//! Corridor mask and connected-region extraction
//!
//! The corridor is the trapezoidal part of the track between the two
//! detection rows. Each row is stored as a half-open `[left, right)` column
//! span clipped to the image, so a scan only touches corridor pixels.
//!
//! Regions are 8-connected groups of pixels carrying the same label. Only
//! their bounding boxes are reported; holes and inner contours are ignored,
//! which matches external-contour extraction.

use image::RgbImage;

use crate::geometry::{Rect, TrackGeometry};

/// Per-row column spans of the detection corridor
#[derive(Debug, Clone)]
pub struct CorridorMask {
    first_row: i32,
    spans: Vec<(i32, i32)>,
}

impl CorridorMask {
    /// Build the mask for rows `upper_y..=lower_y` on a `width`x`height` image
    pub fn new(geometry: &TrackGeometry, upper_y: i32, lower_y: i32, width: u32, height: u32) -> Self {
        let first_row = upper_y.max(0);
        let last_row = lower_y.min(height as i32 - 1);
        let spans = (first_row..=last_row)
            .map(|y| {
                let line = geometry.line_at(y);
                let left = line.left().x.clamp(0, width as i32);
                let right = line.right().x.clamp(0, width as i32);
                (left, right.max(left))
            })
            .collect();
        Self { first_row, spans }
    }

    /// First covered row
    pub fn first_row(&self) -> i32 {
        self.first_row
    }

    /// Number of covered rows
    pub fn rows(&self) -> usize {
        self.spans.len()
    }

    /// Column span of row `y`, if covered
    #[inline]
    pub fn span(&self, y: i32) -> Option<(i32, i32)> {
        let index = usize::try_from(y - self.first_row).ok()?;
        self.spans.get(index).copied()
    }

    /// Whether `(x, y)` lies inside the corridor
    #[inline]
    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.span(y).is_some_and(|(l, r)| x >= l && x < r)
    }

    /// Total number of pixels covered
    pub fn area(&self) -> usize {
        self.spans.iter().map(|(l, r)| (r - l) as usize).sum()
    }

    /// Bounding box of the corridor
    pub fn bounds(&self) -> Rect {
        let left = self.spans.iter().map(|s| s.0).min().unwrap_or(0);
        let right = self.spans.iter().map(|s| s.1).max().unwrap_or(0);
        Rect::new(left, self.first_row, right - left, self.spans.len() as i32)
    }
}

/// Label every corridor pixel with `classify` (0 = background)
///
/// The result is indexed by `(y - bounds.y) * bounds.width + (x - bounds.x)`.
pub fn label_pixels<F>(image: &RgbImage, mask: &CorridorMask, classify: F) -> Vec<u8>
where
    F: Fn(&image::Rgb<u8>) -> u8,
{
    let bounds = mask.bounds();
    let mut labels = vec![0u8; (bounds.width.max(0) * bounds.height.max(0)) as usize];
    if labels.is_empty() {
        return labels;
    }
    for (row, &(left, right)) in mask.spans.iter().enumerate() {
        let y = mask.first_row + row as i32;
        if y as u32 >= image.height() {
            break;
        }
        let base = row * bounds.width as usize;
        for x in left..right.min(image.width() as i32) {
            labels[base + (x - bounds.x) as usize] = classify(image.get_pixel(x as u32, y as u32));
        }
    }
    labels
}

/// Bounding boxes of the 8-connected regions carrying `label`
pub fn find_regions(labels: &[u8], mask: &CorridorMask, label: u8) -> Vec<Rect> {
    let bounds = mask.bounds();
    let (w, h) = (bounds.width.max(0) as usize, bounds.height.max(0) as usize);
    if label == 0 || labels.len() != w * h {
        return Vec::new();
    }

    let mut visited = vec![false; labels.len()];
    let mut stack = Vec::new();
    let mut regions = Vec::new();

    for start in 0..labels.len() {
        if visited[start] || labels[start] != label {
            continue;
        }
        visited[start] = true;
        stack.push(start);
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (usize::MAX, usize::MAX, 0, 0);

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);

            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let n = ny * w + nx;
                    if !visited[n] && labels[n] == label {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        regions.push(Rect::new(
            bounds.x + min_x as i32,
            bounds.y + min_y as i32,
            (max_x - min_x + 1) as i32,
            (max_y - min_y + 1) as i32,
        ));
    }
    regions
}
