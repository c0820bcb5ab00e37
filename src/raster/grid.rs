use geo::Coord;
use serde::{Deserialize, Serialize};

use crate::crs::Bbox;

/// Slack for floor/ceil so that bbox edges sitting on a pixel edge
/// do not pull in an extra row or column through rounding noise.
const EDGE_EPS: f64 = 1e-9;

/// North-up affine georeferencing: pixel `(row, col)` has its top-left
/// corner at `(origin_x + col * pixel_width, origin_y - row * pixel_height)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

/// A rectangular block of pixels in raster coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    pub fn full(width: usize, height: usize) -> Self {
        Self { col_off: 0, row_off: 0, width, height }
    }

    #[inline] pub fn col_end(&self) -> usize { self.col_off + self.width }

    #[inline] pub fn row_end(&self) -> usize { self.row_off + self.height }

    #[inline] pub fn is_empty(&self) -> bool { self.width == 0 || self.height == 0 }
}

impl GeoTransform {
    pub fn new(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self { origin_x, origin_y, pixel_width, pixel_height }
    }

    /// Georeferenced extent of a `width` x `height` grid.
    pub fn extent(&self, width: usize, height: usize) -> Bbox {
        Bbox::new(
            self.origin_x,
            self.origin_y - height as f64 * self.pixel_height,
            self.origin_x + width as f64 * self.pixel_width,
            self.origin_y,
        )
    }

    /// Centre of pixel `(row, col)`.
    #[inline]
    pub fn pixel_center(&self, row: usize, col: usize) -> Coord<f64> {
        Coord {
            x: self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            y: self.origin_y - (row as f64 + 0.5) * self.pixel_height,
        }
    }

    /// Fractional column of an x coordinate.
    #[inline]
    pub fn col_of(&self, x: f64) -> f64 { (x - self.origin_x) / self.pixel_width }

    /// Fractional row of a y coordinate.
    #[inline]
    pub fn row_of(&self, y: f64) -> f64 { (self.origin_y - y) / self.pixel_height }

    /// Transform of the sub-grid starting at the window's top-left pixel.
    pub fn window_transform(&self, window: &PixelWindow) -> GeoTransform {
        GeoTransform {
            origin_x: self.origin_x + window.col_off as f64 * self.pixel_width,
            origin_y: self.origin_y - window.row_off as f64 * self.pixel_height,
            ..*self
        }
    }

    /// Smallest pixel window covering `bbox`, clamped to a `width` x `height` grid.
    /// `None` when the bbox does not overlap the grid.
    pub fn window_for(&self, bbox: &Bbox, width: usize, height: usize) -> Option<PixelWindow> {
        let col0 = (self.col_of(bbox.xmin) + EDGE_EPS).floor().max(0.0);
        let col1 = (self.col_of(bbox.xmax) - EDGE_EPS).ceil().min(width as f64);
        let row0 = (self.row_of(bbox.ymax) + EDGE_EPS).floor().max(0.0);
        let row1 = (self.row_of(bbox.ymin) - EDGE_EPS).ceil().min(height as f64);

        if !(col1 > col0 && row1 > row0) {
            return None;
        }
        Some(PixelWindow {
            col_off: col0 as usize,
            row_off: row0 as usize,
            width: (col1 - col0) as usize,
            height: (row1 - row0) as usize,
        })
    }
}

/// Fraction of `requested`'s area lying inside `extent`.
/// A degenerate request counts as covered when it lies inside the extent.
pub(crate) fn coverage_fraction(requested: &Bbox, extent: &Bbox) -> f64 {
    let area = requested.area();
    if area <= 0.0 {
        let inside = requested.xmin >= extent.xmin && requested.xmax <= extent.xmax
            && requested.ymin >= extent.ymin && requested.ymax <= extent.ymax;
        return if inside { 1.0 } else { 0.0 };
    }
    requested.intersection(extent)
        .map(|overlap| (overlap.area() / area).clamp(0.0, 1.0))
        .unwrap_or(0.0)
}
