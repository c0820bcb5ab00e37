use anyhow::{Context, Result, anyhow};
use geo::{Coord, MapCoords, MultiPolygon};
use proj4rs::{proj::Proj as Proj4, transform::transform};

use super::{Bbox, Crs};

/// Default number of sample points per bbox edge.
pub(crate) const DENSIFY_POINTS: usize = 21;

struct Endpoint {
    proj: Proj4,
    geographic: bool,
}

impl Endpoint {
    fn new(crs: &Crs) -> Result<Self> {
        let proj_string = crs.proj4()?;
        let proj = Proj4::from_proj_string(&proj_string)
            .with_context(|| anyhow!("failed to build PROJ.4: {proj_string}"))?;
        Ok(Self { proj, geographic: crs.is_geographic() })
    }
}

/// Coordinate transformation between two CRSs.
///
/// Geographic coordinates are taken and returned in degrees; the
/// radian convention of `proj4rs` stays inside this type.
pub struct Transformer {
    from: Crs,
    to: Crs,
    endpoints: Option<(Endpoint, Endpoint)>,
}

impl Transformer {
    pub fn new(from: &Crs, to: &Crs) -> Result<Self> {
        let endpoints = if from.equivalent(to) {
            None
        } else {
            Some((Endpoint::new(from)?, Endpoint::new(to)?))
        };
        Ok(Self { from: from.clone(), to: to.clone(), endpoints })
    }

    #[inline] pub fn is_identity(&self) -> bool { self.endpoints.is_none() }

    #[inline] pub fn source(&self) -> &Crs { &self.from }

    #[inline] pub fn target(&self) -> &Crs { &self.to }

    /// Transform a single coordinate.
    pub fn transform_coord(&self, coord: Coord<f64>) -> Result<Coord<f64>> {
        let Some((from, to)) = &self.endpoints else { return Ok(coord) };

        let mut point = if from.geographic {
            (coord.x.to_radians(), coord.y.to_radians(), 0.0)
        } else {
            (coord.x, coord.y, 0.0)
        };
        transform(&from.proj, &to.proj, &mut point)
            .map_err(|e| anyhow!("CRS transform {} -> {} failed: {e:?}", self.from, self.to))?;

        let out = if to.geographic {
            Coord { x: point.0.to_degrees(), y: point.1.to_degrees() }
        } else {
            Coord { x: point.0, y: point.1 }
        };
        if !(out.x.is_finite() && out.y.is_finite()) {
            return Err(anyhow!("CRS transform {} -> {} produced a non-finite coordinate", self.from, self.to));
        }
        Ok(out)
    }

    /// Reproject every vertex of a multipolygon.
    pub fn transform_geometry(&self, geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        if self.is_identity() {
            return Ok(geometry.clone());
        }
        geometry.try_map_coords(|coord| self.transform_coord(coord))
    }

    /// Transform a bbox by sampling `densify` points along each edge and
    /// taking the envelope of the results.
    pub fn transform_bounds(&self, bbox: &Bbox, densify: usize) -> Result<Bbox> {
        if self.is_identity() {
            return Ok(*bbox);
        }
        let steps = densify.max(2) - 1;
        let (mut xmin, mut ymin) = (f64::INFINITY, f64::INFINITY);
        let (mut xmax, mut ymax) = (f64::NEG_INFINITY, f64::NEG_INFINITY);

        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let x = bbox.xmin + t * bbox.width();
            let y = bbox.ymin + t * bbox.height();
            let samples = [
                Coord { x, y: bbox.ymin },
                Coord { x, y: bbox.ymax },
                Coord { x: bbox.xmin, y },
                Coord { x: bbox.xmax, y },
            ];
            for sample in samples {
                let c = self.transform_coord(sample)?;
                xmin = xmin.min(c.x);
                ymin = ymin.min(c.y);
                xmax = xmax.max(c.x);
                ymax = ymax.max(c.y);
            }
        }
        Ok(Bbox::new(xmin, ymin, xmax, ymax))
    }
}
