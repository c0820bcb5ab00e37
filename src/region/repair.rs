use std::panic::{AssertUnwindSafe, catch_unwind};

use geo::{Area, BooleanOps, CoordsIter, MultiPolygon, Validation};

/// Return a valid version of `geometry`.
///
/// Valid input is returned as is. Invalid input is rebuilt with a boolean
/// self-union (the buffer-zero trick); the result must be valid and non-empty.
pub(crate) fn repair_geometry(geometry: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>, String> {
    if geometry.0.is_empty() || geometry.coords_count() == 0 {
        return Err("empty geometry".into());
    }
    if geometry.coords_iter().any(|c| !(c.x.is_finite() && c.y.is_finite())) {
        return Err("non-finite coordinate".into());
    }
    if geometry.is_valid() {
        if geometry.unsigned_area() == 0.0 {
            return Err("zero-area geometry".into());
        }
        return Ok(geometry.clone());
    }

    let repaired = catch_unwind(AssertUnwindSafe(|| geometry.union(&MultiPolygon::<f64>::new(vec![]))))
        .map_err(|_| "geometry kernel panicked during self-union".to_string())?;

    if repaired.0.is_empty() || repaired.unsigned_area() == 0.0 {
        return Err("geometry is empty after repair".into());
    }
    if !repaired.is_valid() {
        return Err("geometry is still invalid after repair".into());
    }
    Ok(repaired)
}

/// Union all parts into non-overlapping polygons.
pub(crate) fn dissolve(parts: &[MultiPolygon<f64>]) -> Result<MultiPolygon<f64>, String> {
    catch_unwind(AssertUnwindSafe(|| {
        parts.iter().fold(MultiPolygon::<f64>::new(vec![]), |acc, part| acc.union(part))
    }))
    .map_err(|_| "geometry kernel panicked during dissolve".to_string())
}
