use std::fmt;

use geo::{BoundingRect, Coord, MultiPolygon, Rect};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box `(xmin, ymin, xmax, ymax)` in some CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bbox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Bbox {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self { xmin, ymin, xmax, ymax }
    }

    /// Bounding box of a multipolygon, `None` when it has no coordinates.
    pub fn of(geometry: &MultiPolygon<f64>) -> Option<Self> {
        geometry.bounding_rect().map(Self::from)
    }

    #[inline] pub fn width(&self) -> f64 { self.xmax - self.xmin }

    #[inline] pub fn height(&self) -> f64 { self.ymax - self.ymin }

    #[inline] pub fn area(&self) -> f64 { self.width().max(0.0) * self.height().max(0.0) }

    /// True for degenerate or inverted boxes.
    #[inline] pub fn is_empty(&self) -> bool { !(self.width() > 0.0 && self.height() > 0.0) }

    /// Smallest box containing both boxes.
    pub fn union(&self, other: &Bbox) -> Bbox {
        Bbox::new(
            self.xmin.min(other.xmin),
            self.ymin.min(other.ymin),
            self.xmax.max(other.xmax),
            self.ymax.max(other.ymax),
        )
    }

    /// Overlap of two boxes, `None` when they do not overlap with positive area.
    pub fn intersection(&self, other: &Bbox) -> Option<Bbox> {
        let clipped = Bbox::new(
            self.xmin.max(other.xmin),
            self.ymin.max(other.ymin),
            self.xmax.min(other.xmax),
            self.ymax.min(other.ymax),
        );
        (!clipped.is_empty()).then_some(clipped)
    }

    /// Union of many boxes, `None` when the iterator is empty.
    pub fn union_all(boxes: impl IntoIterator<Item = Bbox>) -> Option<Bbox> {
        boxes.into_iter().reduce(|a, b| a.union(&b))
    }

    /// Format as `[xmin, ymin, xmax, ymax]` with a fixed number of decimals.
    pub fn format(&self, precision: usize) -> String {
        format!(
            "[{:.p$}, {:.p$}, {:.p$}, {:.p$}]",
            self.xmin, self.ymin, self.xmax, self.ymax,
            p = precision,
        )
    }

    /// Bit-exact key fragment, used for cache keys.
    pub(crate) fn key(&self) -> String {
        format!(
            "{:016x}{:016x}{:016x}{:016x}",
            self.xmin.to_bits(), self.ymin.to_bits(), self.xmax.to_bits(), self.ymax.to_bits()
        )
    }
}

impl From<Rect<f64>> for Bbox {
    fn from(rect: Rect<f64>) -> Self {
        Self::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y)
    }
}

impl From<Bbox> for Rect<f64> {
    fn from(bbox: Bbox) -> Self {
        Rect::new(
            Coord { x: bbox.xmin, y: bbox.ymin },
            Coord { x: bbox.xmax, y: bbox.ymax },
        )
    }
}

impl fmt::Display for Bbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format(5))
    }
}

#[cfg(test)]
mod tests {
    use super::Bbox;

    #[test]
    fn union_all_covers_every_box() {
        let union = Bbox::union_all([
            Bbox::new(0.0, 0.0, 1.0, 1.0),
            Bbox::new(-2.0, 0.5, 0.5, 3.0),
        ]).unwrap();
        assert_eq!(union, Bbox::new(-2.0, 0.0, 1.0, 3.0));
        assert!(Bbox::union_all([]).is_none());
    }

    #[test]
    fn intersection_of_disjoint_boxes_is_none() {
        let a = Bbox::new(0.0, 0.0, 1.0, 1.0);
        assert!(a.intersection(&Bbox::new(2.0, 2.0, 3.0, 3.0)).is_none());
        // Touching edges have zero area.
        assert!(a.intersection(&Bbox::new(1.0, 0.0, 2.0, 1.0)).is_none());
        assert_eq!(
            a.intersection(&Bbox::new(0.5, 0.5, 2.0, 2.0)),
            Some(Bbox::new(0.5, 0.5, 1.0, 1.0))
        );
    }

    #[test]
    fn display_uses_five_decimals() {
        let b = Bbox::new(-105.0, 40.123456, -104.5, 41.0);
        assert_eq!(b.to_string(), "[-105.00000, 40.12346, -104.50000, 41.00000]");
    }
}
