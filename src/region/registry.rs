use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use geo::{Area, MultiPolygon};

use super::{
    BoundarySource, DroppedFeature, Region, RegionSet, RegionSpec,
    code::pick_code_field,
    normalize_code,
    repair::{dissolve, repair_geometry},
};
use crate::{
    config::PipelineConfig,
    crs::{Bbox, Transformer},
    error::EdenError,
};

/// Select, repair, measure and reproject the configured regions.
///
/// Every configured region is matched against the source serving its (scheme, level) by
/// normalized code. Configured uids without any matching raw feature are a
/// hard error; features whose geometry cannot be repaired are dropped and
/// listed in [`RegionSet::dropped`].
pub fn prepare_regions(sources: &[&dyn BoundarySource], config: &PipelineConfig) -> Result<RegionSet> {
    let mut by_level: BTreeMap<(&str, u32), Vec<&RegionSpec>> = BTreeMap::new();
    for spec in &config.regions {
        by_level.entry((spec.scheme.as_str(), spec.level)).or_default().push(spec);
    }

    let mut regions = Vec::new();
    let mut dropped = Vec::new();
    let mut unmatched = Vec::new();

    for ((scheme, level), specs) in by_level {
        let Some(source) = sources.iter().find(|s| s.scheme() == scheme && s.level() == level) else {
            log::warn!("[registry] no boundary source for scheme {scheme} level {level}");
            unmatched.extend(specs.iter().map(|s| s.uid.clone()));
            continue;
        };
        let (mut found, mut lost, missing) = prepare_level(*source, &specs, config)?;
        regions.append(&mut found);
        dropped.append(&mut lost);
        unmatched.extend(missing);
    }

    if !unmatched.is_empty() {
        unmatched.sort();
        bail!(EdenError::UnmatchedRegions { uids: unmatched });
    }

    let set = RegionSet::new(config.working_crs.clone(), regions, dropped);
    for uid in set.dropped_uids() {
        log::warn!("[registry] region {uid} dropped: no repairable geometry");
    }
    log::info!("[registry] prepared {} regions ({} features dropped)", set.len(), set.dropped().len());
    Ok(set)
}

type LevelOutcome = (Vec<Region>, Vec<DroppedFeature>, Vec<String>);

fn prepare_level(source: &dyn BoundarySource, specs: &[&RegionSpec], config: &PipelineConfig) -> Result<LevelOutcome> {
    let code_field = pick_code_field(&source.columns(), source.code_field(), source.name())?;
    log::debug!("[registry] {}: code field {code_field}", source.name());

    let wanted = specs.iter()
        .map(|spec| (normalize_code(&spec.code.to_string()), *spec))
        .collect::<BTreeMap<_, _>>();

    // Matched features grouped by uid, in source order.
    let mut matched: BTreeMap<&str, Vec<&super::RawFeature>> = BTreeMap::new();
    for feature in source.features() {
        let Some(value) = feature.attributes.get(&code_field) else { continue };
        if let Some(spec) = wanted.get(&normalize_code(&value.to_string())) {
            matched.entry(spec.uid.as_str()).or_default().push(feature);
        }
    }

    let to_area = Transformer::new(source.crs(), &config.area_crs)?;
    let to_working = Transformer::new(source.crs(), &config.working_crs)?;

    let mut regions = Vec::new();
    let mut dropped = Vec::new();
    let mut missing = Vec::new();

    for spec in specs {
        let Some(features) = matched.get(spec.uid.as_str()) else {
            missing.push(spec.uid.clone());
            continue;
        };

        let mut parts = Vec::with_capacity(features.len());
        for feature in features {
            let repaired = match &feature.geometry {
                Some(geometry) => repair_geometry(geometry),
                None => Err("not a polygon".to_string()),
            };
            match repaired {
                Ok(geometry) => parts.push(geometry),
                Err(reason) => {
                    let failure = EdenError::GeometryRepair {
                        feature: format!("{} #{} ({})", source.name(), feature.index, spec.uid),
                        detail: reason.clone(),
                    };
                    log::warn!("[registry] {failure}; feature dropped");
                    dropped.push(DroppedFeature {
                        uid: spec.uid.clone(),
                        source: source.name().to_string(),
                        index: feature.index,
                        reason,
                    });
                }
            }
        }
        if parts.is_empty() {
            continue;
        }

        let geometry = if config.registry.dissolve {
            match dissolve(&parts) {
                Ok(merged) => merged,
                Err(reason) => {
                    log::warn!("[registry] dissolve failed for {}: {reason}; keeping parts", spec.uid);
                    MultiPolygon(parts.into_iter().flat_map(|p| p.0).collect())
                }
            }
        } else {
            MultiPolygon(parts.into_iter().flat_map(|p| p.0).collect())
        };

        let area_km2 = to_area.transform_geometry(&geometry)
            .with_context(|| format!("Failed to project region {} to {}", spec.uid, config.area_crs))?
            .unsigned_area() / 1_000_000.0;
        let geometry = to_working.transform_geometry(&geometry)
            .with_context(|| format!("Failed to project region {} to {}", spec.uid, config.working_crs))?;
        let Some(bbox) = Bbox::of(&geometry) else { continue };

        let name = match &spec.name {
            Some(name) => name.clone(),
            None => source.name_field()
                .and_then(|field| features.first()?.attributes.get(field))
                .map(|value| value.to_string())
                .unwrap_or_default(),
        };

        regions.push(Region {
            uid: spec.uid.clone(),
            scheme: spec.scheme.clone(),
            level: spec.level,
            code: normalize_code(&spec.code.to_string()),
            name,
            geometry,
            bbox,
            area_km2,
            dissolved: config.registry.dissolve,
        });
    }

    Ok((regions, dropped, missing))
}
