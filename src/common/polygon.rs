use geo::{Coord, LineString, MultiPolygon, Polygon};
use shapefile as shp;

/// Convert shapefile polygon rings to geo::MultiPolygon<f64>.
/// Each outer ring starts a polygon; the inner rings that follow are its holes.
pub(crate) fn shp_rings_to_geo<P>(rings: &[shp::PolygonRing<P>], xy: impl Fn(&P) -> Coord<f64>) -> MultiPolygon<f64> {
    /// Ensure first and last are the same for geo::LineString coords
    fn closed(mut coords: Vec<Coord<f64>>) -> LineString<f64> {
        if let (Some(first), Some(last)) = (coords.first().copied(), coords.last().copied()) {
            if first != last { coords.push(first) }
        }
        LineString(coords)
    }

    let mut polys: Vec<Polygon<f64>> = Vec::new();
    let mut current_exterior: Option<LineString<f64>> = None;
    let mut current_holes: Vec<LineString<f64>> = Vec::new();

    for ring in rings {
        let ls = closed(ring.points().iter().map(&xy).collect());
        match ring {
            shp::PolygonRing::Outer(_) => {
                // flush previous polygon
                if let Some(ext) = current_exterior.take() {
                    polys.push(Polygon::new(ext, std::mem::take(&mut current_holes)));
                }
                current_exterior = Some(ls);
            }
            shp::PolygonRing::Inner(_) => current_holes.push(ls),
        }
    }
    if let Some(ext) = current_exterior {
        polys.push(Polygon::new(ext, current_holes));
    }

    MultiPolygon(polys)
}

/// Convert any polygonal shapefile shape to a multipolygon, `None` for other shape types.
pub(crate) fn shape_to_geo(shape: &shp::Shape) -> Option<MultiPolygon<f64>> {
    match shape {
        shp::Shape::Polygon(p) => Some(shp_rings_to_geo(p.rings(), |pt| Coord { x: pt.x, y: pt.y })),
        shp::Shape::PolygonM(p) => Some(shp_rings_to_geo(p.rings(), |pt| Coord { x: pt.x, y: pt.y })),
        shp::Shape::PolygonZ(p) => Some(shp_rings_to_geo(p.rings(), |pt| Coord { x: pt.x, y: pt.y })),
        _ => None,
    }
}

/// Convert geo::MultiPolygon<f64> to shapefile::Polygon (clockwise outers, counter-clockwise holes).
#[cfg(test)]
pub(crate) fn geo_to_shp(mp: &MultiPolygon<f64>) -> shp::Polygon {
    fn ring(ls: &LineString<f64>, clockwise: bool) -> Vec<shp::Point> {
        let mut pts = ls.coords().map(|c| shp::Point { x: c.x, y: c.y }).collect::<Vec<_>>();
        let area: f64 = pts.windows(2).map(|w| w[0].x * w[1].y - w[1].x * w[0].y).sum();
        if (area < 0.0) != clockwise { pts.reverse() }
        pts
    }

    let mut rings = Vec::new();
    for poly in &mp.0 {
        rings.push(shp::PolygonRing::Outer(ring(poly.exterior(), true)));
        for hole in poly.interiors() {
            rings.push(shp::PolygonRing::Inner(ring(hole, false)));
        }
    }
    shp::Polygon::with_rings(rings)
}
