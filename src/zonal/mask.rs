use geo::{Coord, LineString, MultiPolygon};
use ndarray::Array2;

use crate::raster::GeoTransform;

/// Rasterize `geometry` onto a `height` x `width` grid by pixel-centre containment.
///
/// Rings of one polygon combine even-odd (holes are excluded); polygons are
/// OR-ed, so overlapping parts are counted once. A centre on a boundary follows
/// the half-open rule: left and bottom edges are inside, right and top are not.
pub(crate) fn rasterize(geometry: &MultiPolygon<f64>, transform: &GeoTransform, width: usize, height: usize) -> Array2<bool> {
    let mut mask = Array2::from_elem((height, width), false);
    let mut crossings = Vec::new();

    for row in 0..height {
        let y = transform.pixel_center(row, 0).y;
        for polygon in geometry {
            crossings.clear();
            ring_crossings(polygon.exterior(), y, &mut crossings);
            for interior in polygon.interiors() {
                ring_crossings(interior, y, &mut crossings);
            }
            if crossings.len() < 2 {
                continue;
            }
            crossings.sort_by(f64::total_cmp);

            for span in crossings.chunks_exact(2) {
                let (x0, x1) = (span[0], span[1]);
                let lo = (transform.col_of(x0) - 0.5).ceil() - 1.0;
                let hi = (transform.col_of(x1) - 0.5).ceil() + 1.0;
                let lo = lo.max(0.0) as usize;
                let hi = hi.clamp(0.0, width as f64) as usize;
                for col in lo..hi {
                    let x = transform.pixel_center(row, col).x;
                    if x >= x0 && x < x1 {
                        mask[[row, col]] = true;
                    }
                }
            }
        }
    }
    mask
}

/// X coordinates where the horizontal line at `y` crosses `ring`.
/// An edge counts when `y` lies in `[min(y0, y1), max(y0, y1))`.
fn ring_crossings(ring: &LineString<f64>, y: f64, out: &mut Vec<f64>) {
    for line in ring.lines() {
        let (Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 }) = (line.start, line.end);
        if (y0 <= y) != (y1 <= y) {
            out.push(x0 + (y - y0) * (x1 - x0) / (y1 - y0));
        }
    }
}

#[cfg(test)]
mod tests {
    use geo::{MultiPolygon, Polygon, polygon};

    use super::rasterize;
    use crate::raster::GeoTransform;

    fn unit_grid() -> GeoTransform {
        GeoTransform::new(0.0, 10.0, 1.0, 1.0)
    }

    #[test]
    fn square_covers_exactly_its_pixels() {
        let square = polygon![(x: 2.0, y: 2.0), (x: 6.0, y: 2.0), (x: 6.0, y: 5.0), (x: 2.0, y: 5.0)];
        let mask = rasterize(&MultiPolygon(vec![square]), &unit_grid(), 10, 10);
        assert_eq!(mask.iter().filter(|&&m| m).count(), 12);
        // Row 5 has centre y = 4.5, column 2 has centre x = 2.5.
        assert!(mask[[5, 2]] && mask[[7, 5]]);
        assert!(!mask[[4, 2]] && !mask[[5, 6]]);
    }

    #[test]
    fn centre_on_boundary_follows_half_open_rule() {
        // Edges pass through pixel centres: x = 1.5 and 3.5, y = 6.5 and 8.5.
        let square = polygon![(x: 1.5, y: 6.5), (x: 3.5, y: 6.5), (x: 3.5, y: 8.5), (x: 1.5, y: 8.5)];
        let mask = rasterize(&MultiPolygon(vec![square]), &unit_grid(), 10, 10);
        // Left column (x = 1.5) and bottom row (y = 6.5, row 3) are in.
        assert!(mask[[3, 1]] && mask[[2, 2]]);
        // Right column (x = 3.5) and top row (y = 8.5, row 1) are out.
        assert!(!mask[[2, 3]] && !mask[[1, 1]]);
        assert_eq!(mask.iter().filter(|&&m| m).count(), 4);
    }

    #[test]
    fn holes_are_excluded_and_overlaps_counted_once() {
        let outer = Polygon::new(
            vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)].into(),
            vec![vec![(4.0, 4.0), (6.0, 4.0), (6.0, 6.0), (4.0, 6.0), (4.0, 4.0)].into()],
        );
        let mask = rasterize(&MultiPolygon(vec![outer]), &unit_grid(), 10, 10);
        assert_eq!(mask.iter().filter(|&&m| m).count(), 96);

        let a = polygon![(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 2.0), (x: 0.0, y: 2.0)];
        let b = polygon![(x: 2.0, y: 0.0), (x: 6.0, y: 0.0), (x: 6.0, y: 2.0), (x: 2.0, y: 2.0)];
        let mask = rasterize(&MultiPolygon(vec![a, b]), &unit_grid(), 10, 10);
        assert_eq!(mask.iter().filter(|&&m| m).count(), 12);
    }

    #[test]
    fn sliver_smaller_than_a_pixel_can_be_empty() {
        let sliver = polygon![(x: 2.1, y: 2.1), (x: 2.4, y: 2.1), (x: 2.4, y: 2.3), (x: 2.1, y: 2.3)];
        let mask = rasterize(&MultiPolygon(vec![sliver]), &unit_grid(), 10, 10);
        assert!(mask.iter().all(|&m| !m));
    }
}
