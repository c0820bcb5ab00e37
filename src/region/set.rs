use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use geo::MultiPolygon;
use polars::prelude::{Column, DataFrame};
use serde_json::{Map, Value};

use crate::{
    common::{read_from_geojson_bytes, write_atomic, write_table, write_to_geojson_bytes},
    config::OutputFormat,
    crs::{Bbox, Crs},
};

/// A canonical region: repaired geometry in the working CRS plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub uid: String,
    pub scheme: String,
    pub level: u32,
    /// Normalized code.
    pub code: String,
    pub name: String,
    pub geometry: MultiPolygon<f64>,
    pub bbox: Bbox,
    /// Area in km² measured in the equal-area CRS.
    pub area_km2: f64,
    pub dissolved: bool,
}

/// A matched feature that was removed because its geometry could not be repaired.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedFeature {
    pub uid: String,
    pub source: String,
    pub index: usize,
    pub reason: String,
}

/// Output of the region registry, sorted by uid.
#[derive(Debug, Clone)]
pub struct RegionSet {
    crs: Crs,
    regions: Vec<Region>,
    dropped: Vec<DroppedFeature>,
}

const BOUNDS_STEM: &str = "region_bounds";
const QA_STEM: &str = "region_qa";
const GEOJSON_FILE: &str = "regions.geojson";

impl RegionSet {
    pub fn new(crs: Crs, mut regions: Vec<Region>, dropped: Vec<DroppedFeature>) -> Self {
        regions.sort_by(|a, b| a.uid.cmp(&b.uid));
        Self { crs, regions, dropped }
    }

    #[inline] pub fn crs(&self) -> &Crs { &self.crs }

    #[inline] pub fn regions(&self) -> &[Region] { &self.regions }

    #[inline] pub fn dropped(&self) -> &[DroppedFeature] { &self.dropped }

    #[inline] pub fn len(&self) -> usize { self.regions.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.regions.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &Region> { self.regions.iter() }

    pub fn get(&self, uid: &str) -> Option<&Region> {
        self.regions.binary_search_by(|r| r.uid.as_str().cmp(uid)).ok().map(|i| &self.regions[i])
    }

    /// Region uids in output order.
    pub fn uids(&self) -> Vec<&str> {
        self.regions.iter().map(|r| r.uid.as_str()).collect()
    }

    /// Uids whose every matched feature was dropped during repair.
    pub fn dropped_uids(&self) -> Vec<&str> {
        let mut uids = self.dropped.iter()
            .map(|d| d.uid.as_str())
            .filter(|uid| self.get(uid).is_none())
            .collect::<Vec<_>>();
        uids.sort_unstable();
        uids.dedup();
        uids
    }

    /// Union of all region bounding boxes (the area of interest).
    pub fn aoi(&self) -> Option<Bbox> {
        Bbox::union_all(self.regions.iter().map(|r| r.bbox))
    }

    /// `region_uid, xmin, ymin, xmax, ymax` in the working CRS.
    pub fn bounds_frame(&self) -> Result<DataFrame> {
        let r = &self.regions;
        Ok(DataFrame::new(vec![
            Column::new("region_uid".into(), r.iter().map(|r| r.uid.as_str()).collect::<Vec<_>>()),
            Column::new("xmin".into(), r.iter().map(|r| r.bbox.xmin).collect::<Vec<_>>()),
            Column::new("ymin".into(), r.iter().map(|r| r.bbox.ymin).collect::<Vec<_>>()),
            Column::new("xmax".into(), r.iter().map(|r| r.bbox.xmax).collect::<Vec<_>>()),
            Column::new("ymax".into(), r.iter().map(|r| r.bbox.ymax).collect::<Vec<_>>()),
        ])?)
    }

    /// `region_uid, scheme, level, code, name, area_km2` summary for review.
    pub fn qa_frame(&self) -> Result<DataFrame> {
        let r = &self.regions;
        Ok(DataFrame::new(vec![
            Column::new("region_uid".into(), r.iter().map(|r| r.uid.as_str()).collect::<Vec<_>>()),
            Column::new("scheme".into(), r.iter().map(|r| r.scheme.as_str()).collect::<Vec<_>>()),
            Column::new("level".into(), r.iter().map(|r| r.level).collect::<Vec<_>>()),
            Column::new("code".into(), r.iter().map(|r| r.code.as_str()).collect::<Vec<_>>()),
            Column::new("name".into(), r.iter().map(|r| r.name.as_str()).collect::<Vec<_>>()),
            Column::new("area_km2".into(), r.iter().map(|r| r.area_km2).collect::<Vec<_>>()),
        ])?)
    }

    /// Canonical geometry as a GeoJSON FeatureCollection, one feature per uid.
    pub fn to_geojson_bytes(&self) -> Result<Vec<u8>> {
        let features = self.regions.iter().map(|r| {
            let mut props = Map::new();
            props.insert("region_uid".into(), Value::from(r.uid.as_str()));
            props.insert("scheme".into(), Value::from(r.scheme.as_str()));
            props.insert("level".into(), Value::from(r.level));
            props.insert("code".into(), Value::from(r.code.as_str()));
            props.insert("name".into(), Value::from(r.name.as_str()));
            props.insert("area_km2".into(), Value::from(r.area_km2));
            props.insert("dissolved".into(), Value::from(r.dissolved));
            (r.geometry.clone(), props)
        }).collect::<Vec<_>>();
        write_to_geojson_bytes(&features, Some(&self.crs.to_string()))
    }

    /// Write bounds, canonical geometry and the area summary into `dir`.
    pub fn write(&self, dir: &Path, format: OutputFormat) -> Result<Vec<PathBuf>> {
        let geojson = dir.join(GEOJSON_FILE);
        write_atomic(&geojson, &self.to_geojson_bytes()?)?;
        let bounds = write_table(&mut self.bounds_frame()?, dir, BOUNDS_STEM, format)?;
        let qa = write_table(&mut self.qa_frame()?, dir, QA_STEM, format)?;
        log::info!("[registry] wrote {} regions to {}", self.len(), dir.display());
        Ok(vec![bounds, geojson, qa])
    }

    /// Read canonical geometry written by [`RegionSet::to_geojson_bytes`].
    pub fn read_geojson(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let (features, crs) = read_from_geojson_bytes(&bytes)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        let crs = match crs {
            Some(name) => Crs::parse(&name)?,
            None => Crs::WGS84,
        };

        let regions = features.into_iter().enumerate().map(|(i, (geometry, props))| {
            let text = |key: &str| props.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
            let uid = text("region_uid");
            if uid.is_empty() {
                return Err(anyhow!("feature {i} of {} has no region_uid", path.display()));
            }
            let bbox = Bbox::of(&geometry)
                .ok_or_else(|| anyhow!("region {uid} has empty geometry"))?;
            Ok(Region {
                scheme: text("scheme"),
                level: props.get("level").and_then(Value::as_u64).unwrap_or_default() as u32,
                code: text("code"),
                name: text("name"),
                area_km2: props.get("area_km2").and_then(Value::as_f64).unwrap_or(f64::NAN),
                dissolved: props.get("dissolved").and_then(Value::as_bool).unwrap_or(false),
                uid,
                geometry,
                bbox,
            })
        }).collect::<Result<Vec<_>>>()?;

        Ok(Self::new(crs, regions, Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use geo::{MultiPolygon, polygon};

    use super::{DroppedFeature, Region, RegionSet};
    use crate::{config::OutputFormat, crs::{Bbox, Crs}};

    fn square(uid: &str, x: f64) -> Region {
        let geometry = MultiPolygon(vec![polygon![
            (x: x, y: 0.0), (x: x + 1.0, y: 0.0), (x: x + 1.0, y: 1.0), (x: x, y: 1.0), (x: x, y: 0.0),
        ]]);
        Region {
            uid: uid.into(),
            scheme: "EPA_US".into(),
            level: 3,
            code: uid.trim_start_matches("r").into(),
            name: format!("Region {uid}"),
            bbox: Bbox::of(&geometry).unwrap(),
            geometry,
            area_km2: 12_345.0,
            dissolved: false,
        }
    }

    #[test]
    fn regions_are_sorted_and_aoi_is_union() {
        let set = RegionSet::new(Crs::WGS84, vec![square("r2", 5.0), square("r1", -3.0)], vec![]);
        assert_eq!(set.uids(), vec!["r1", "r2"]);
        assert_eq!(set.aoi().unwrap(), Bbox::new(-3.0, 0.0, 6.0, 1.0));
        assert!(set.get("r2").is_some());
        assert!(set.get("r3").is_none());
    }

    #[test]
    fn dropped_uids_exclude_regions_that_kept_parts() {
        let dropped = vec![
            DroppedFeature { uid: "r1".into(), source: "s".into(), index: 4, reason: "x".into() },
            DroppedFeature { uid: "r9".into(), source: "s".into(), index: 5, reason: "x".into() },
        ];
        let set = RegionSet::new(Crs::WGS84, vec![square("r1", 0.0)], dropped);
        assert_eq!(set.dropped_uids(), vec!["r9"]);
    }

    #[test]
    fn written_geojson_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let set = RegionSet::new(Crs::WGS84, vec![square("r1", 0.0), square("r2", 2.0)], vec![]);
        let written = set.write(dir.path(), OutputFormat::Csv).unwrap();
        assert_eq!(written.len(), 3);
        assert!(dir.path().join("region_bounds.csv").exists());
        assert!(dir.path().join("region_qa.csv").exists());

        let back = RegionSet::read_geojson(&dir.path().join("regions.geojson")).unwrap();
        assert_eq!(back.crs(), &Crs::WGS84);
        assert_eq!(back.regions(), set.regions());
    }
}
