use std::collections::BTreeMap;

use anyhow::{Context, Result};
use ndarray::ArrayView2;

use super::{Stat, Status, ZonalRecord, mask::rasterize};
use crate::{
    crs::Transformer,
    raster::{ClippedRaster, CoverageGap, GapReason, ValueKind},
    region::Region,
};

/// Zonal statistics of one region over one clipped raster, band by band.
///
/// Statistics use pixels whose centre lies inside the region and whose value is
/// valid. A band with no such pixels yields a single `coverage` record marked
/// `insufficient_coverage`. Every band also gets a `bbox_coverage` diagnostic.
pub fn aggregate(region: &Region, clipped: &ClippedRaster, kind: &ValueKind) -> Result<Vec<ZonalRecord>> {
    aggregate_with(region, clipped, kind, false)
}

/// As `aggregate`, optionally adding `median`, `q25`, `q75` and `iqr` for continuous rasters.
pub(crate) fn aggregate_with(region: &Region, clipped: &ClippedRaster, kind: &ValueKind, quantiles: bool) -> Result<Vec<ZonalRecord>> {
    let geometry = Transformer::new(&clipped.request_crs, &clipped.crs)?
        .transform_geometry(&region.geometry)
        .with_context(|| format!("Failed to project region {} into {}", region.uid, clipped.crs))?;
    let mask = rasterize(&geometry, &clipped.transform, clipped.width(), clipped.height());

    let mut records = Vec::new();
    for (b, band) in clipped.bands.iter().enumerate() {
        let record = |stat: Stat, category: Option<String>, value: Option<f64>, status: Status| ZonalRecord {
            region_uid: region.uid.clone(),
            source: clipped.source.clone(),
            variable: clipped.variable.clone(),
            band: band.clone(),
            stat,
            category,
            value,
            status,
        };

        let values = masked_values(clipped, clipped.data.index_axis(ndarray::Axis(0), b), mask.view());
        if values.is_empty() {
            log::debug!("[zonal] {} {}/{} band {band}: no valid pixels", region.uid, clipped.source, clipped.variable);
            records.push(record(Stat::Coverage, None, None, Status::InsufficientCoverage));
        } else {
            match kind {
                ValueKind::Continuous => {
                    for (stat, value) in continuous_stats(&values, quantiles) {
                        records.push(record(stat, None, Some(value), Status::Ok));
                    }
                }
                ValueKind::Categorical { classes } => {
                    let (valid, counts) = class_counts(&values, classes);
                    let unmapped = valid - counts.values().sum::<usize>();
                    if unmapped > 0 {
                        log::warn!(
                            "[zonal] {} {}/{} band {band}: {unmapped} valid pixels have codes outside the class map",
                            region.uid, clipped.source, clipped.variable
                        );
                    }
                    records.push(record(Stat::Count, None, Some(valid as f64), Status::Ok));
                    for (code, label) in classes {
                        let count = counts.get(code).copied().unwrap_or(0);
                        records.push(record(Stat::Count, Some(label.clone()), Some(count as f64), Status::Ok));
                        records.push(record(Stat::Pct, Some(label.clone()), Some(count as f64 / valid as f64), Status::Ok));
                    }
                }
            }
        }
        records.push(record(Stat::BboxCoverage, None, Some(clipped.coverage), Status::Ok));
    }
    Ok(records)
}

/// Coverage-gap markers for a raster that supplied no window for `region_uid`.
pub fn gap_records(region_uid: &str, gap: &CoverageGap) -> Vec<ZonalRecord> {
    let mut records = Vec::with_capacity(gap.bands.len() * 2);
    for band in &gap.bands {
        let record = |stat: Stat, value: Option<f64>| ZonalRecord {
            region_uid: region_uid.to_string(),
            source: gap.source.clone(),
            variable: gap.variable.clone(),
            band: band.clone(),
            stat,
            category: None,
            value,
            status: Status::CoverageGap,
        };
        records.push(record(Stat::Coverage, None));
        if gap.reason == GapReason::NoOverlap {
            records.push(record(Stat::BboxCoverage, Some(0.0)));
        }
    }
    records
}

/// Valid values under the mask in raster row-major order.
fn masked_values(clipped: &ClippedRaster, band: ArrayView2<f64>, mask: ArrayView2<bool>) -> Vec<f64> {
    band.iter().zip(mask.iter())
        .filter(|&(&v, &inside)| inside && clipped.is_valid(v))
        .map(|(&v, _)| v)
        .collect()
}

/// Sums accumulate in the given order; `std` is the population deviation from a second pass.
fn continuous_stats(values: &[f64], quantiles: bool) -> Vec<(Stat, f64)> {
    let n = values.len() as f64;
    let mut sum = 0.0;
    let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
    for &v in values {
        sum += v;
        min = min.min(v);
        max = max.max(v);
    }
    let mean = sum / n;
    let mut squares = 0.0;
    for &v in values {
        let d = v - mean;
        squares += d * d;
    }
    let std = (squares / n).sqrt();

    let mut stats = vec![
        (Stat::Count, n),
        (Stat::Mean, mean),
        (Stat::Std, std),
        (Stat::Min, min),
        (Stat::Max, max),
    ];
    if quantiles {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let (q25, median, q75) = (quantile(&sorted, 0.25), quantile(&sorted, 0.5), quantile(&sorted, 0.75));
        stats.extend([(Stat::Median, median), (Stat::Q25, q25), (Stat::Q75, q75), (Stat::Iqr, q75 - q25)]);
    }
    stats
}

/// Linear interpolation between order statistics of a sorted, non-empty slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let (lo, hi) = (pos.floor() as usize, pos.ceil() as usize);
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Valid pixel count and per-class counts; non-integral values belong to no class.
fn class_counts(values: &[f64], classes: &BTreeMap<i64, String>) -> (usize, BTreeMap<i64, usize>) {
    let mut counts = BTreeMap::new();
    for &v in values {
        if v.fract() == 0.0 && classes.contains_key(&(v as i64)) {
            *counts.entry(v as i64).or_insert(0) += 1;
        }
    }
    (values.len(), counts)
}
