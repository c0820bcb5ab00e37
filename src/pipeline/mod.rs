//! Run orchestration: region x raster units in parallel, then QA and assembly.

mod manifest;
mod report;

use std::{path::{Path, PathBuf}, time::Instant};

use anyhow::{Context, Result};
use rayon::{ThreadPoolBuilder, prelude::*};

pub use report::{RunReport, UnitFailure};

use manifest::RunManifest;
use crate::{
    common::ensure_dir_exists,
    config::{OutputFormat, PipelineConfig},
    crs::Crs,
    error::EdenError,
    features::{FeatureTable, assemble},
    qa::{QaChecker, QaReport},
    raster::{CoverageGap, RasterLayer, WindowOutcome, WindowProvider},
    region::{BoundarySource, Region, RegionSet, ShapefileBoundaries, prepare_regions},
    zonal::{StatsTable, ZonalRecord, aggregate_with, gap_records},
};

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stats: StatsTable,
    pub qa: QaReport,
    pub features: FeatureTable,
    pub report: RunReport,
}

impl RunOutput {
    /// Write the statistics, QA flags, features and `manifest.json` into `dir`,
    /// replacing any earlier output set there.
    pub fn write(&self, dir: &Path, format: OutputFormat, signature: &str) -> Result<Vec<PathBuf>> {
        ensure_dir_exists(dir)?;
        let written = vec![
            ("zonal_stats", self.stats.write(dir, format)?, self.stats.len()),
            ("qa_flags", self.qa.write(dir, format)?, self.qa.flags().len()),
            ("features", self.features.write(dir, format)?, self.features.height()),
        ];
        let manifest = RunManifest::new(signature, format, &written)?;
        let manifest_path = manifest.write(dir)?;

        let mut paths = written.into_iter().map(|(_, path, _)| path).collect::<Vec<_>>();
        paths.push(manifest_path);
        log::info!("[pipeline] wrote {} files to {}", paths.len(), dir.display());
        Ok(paths)
    }
}

/// Result of one region x raster unit.
enum UnitResult {
    Records(Vec<ZonalRecord>),
    Gap(Vec<ZonalRecord>, CoverageGap),
    Failed(UnitFailure),
}

/// Immutable pipeline built from one configuration.
pub struct Pipeline {
    config: PipelineConfig,
    provider: WindowProvider,
    checker: QaChecker,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let provider = WindowProvider::new(&config.window);
        let checker = QaChecker::new(&config.qa);
        Ok(Self { config, provider, checker })
    }

    /// Replace the QA checker, e.g. to add custom rules.
    pub fn with_checker(mut self, checker: QaChecker) -> Self {
        self.checker = checker;
        self
    }

    #[inline] pub fn config(&self) -> &PipelineConfig { &self.config }

    #[inline] pub fn provider(&self) -> &WindowProvider { &self.provider }

    /// Validated raster layers of the configuration.
    pub fn layers(&self) -> Result<Vec<RasterLayer>> {
        self.config.rasters.iter().cloned().map(RasterLayer::new).collect()
    }

    /// Open the configured boundary shapefiles and build the region set.
    pub fn prepare_regions(&self) -> Result<RegionSet> {
        let sources = self.config.boundaries.iter()
            .map(ShapefileBoundaries::open)
            .collect::<Result<Vec<_>>>()?;
        let sources = sources.iter().map(|s| s as &dyn BoundarySource).collect::<Vec<_>>();
        prepare_regions(&sources, &self.config)
    }

    /// Registry, aggregation, QA and assembly from the configuration alone.
    pub fn execute(&self) -> Result<(RegionSet, RunOutput)> {
        let regions = self.prepare_regions()?;
        let layers = self.layers()?;
        let output = self.run(&regions, &layers)?;
        Ok((regions, output))
    }

    /// Aggregate every region over every layer, then check and assemble.
    ///
    /// Units run in parallel and share nothing but the window cache. A unit
    /// that fails is reported and the rest continue; collecting every unit is
    /// the barrier before QA and assembly.
    pub fn run(&self, regions: &RegionSet, layers: &[RasterLayer]) -> Result<RunOutput> {
        let started = Instant::now();
        let units = regions.iter()
            .flat_map(|region| layers.iter().map(move |layer| (region, layer)))
            .collect::<Vec<_>>();
        log::info!("[pipeline] {} regions x {} rasters = {} units", regions.len(), layers.len(), units.len());

        let crs = regions.crs();
        let work = || units.par_iter()
            .map(|(region, layer)| self.run_unit(region, layer, crs))
            .collect::<Vec<_>>();
        let results = match self.config.threads {
            Some(threads) => ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .context("Failed to build worker pool")?
                .install(work),
            None => work(),
        };

        let mut report = RunReport::new(regions.len(), layers.len());
        report.dropped = regions.dropped().to_vec();
        let mut records = Vec::new();
        for (result, (region, _)) in results.into_iter().zip(&units) {
            match result {
                UnitResult::Records(mut found) => records.append(&mut found),
                UnitResult::Gap(mut markers, gap) => {
                    records.append(&mut markers);
                    report.gaps.push((region.uid.clone(), gap));
                }
                UnitResult::Failed(failure) => report.failures.push(failure),
            }
        }

        let mut stats = StatsTable::new(records);
        stats.sort();
        let qa = self.checker.check(&stats);
        let features = assemble(&stats, &regions.uids());

        report.record_qa(&qa);
        report.elapsed = started.elapsed();
        log::info!("[pipeline] {}", report.headline());
        Ok(RunOutput { stats, qa, features, report })
    }

    fn run_unit(&self, region: &Region, layer: &RasterLayer, crs: &Crs) -> UnitResult {
        let id = layer.identity();
        let result = self.provider.read_window(layer, &region.bbox, crs).and_then(|outcome| match outcome {
            WindowOutcome::Clipped(clipped) => {
                aggregate_with(region, &clipped, layer.kind(), self.config.zonal.quantiles).map(UnitResult::Records)
            }
            WindowOutcome::Gap(gap) => {
                log::debug!("[pipeline] {} x {id}: coverage gap ({:?})", region.uid, gap.reason);
                Ok(UnitResult::Gap(gap_records(&region.uid, &gap), gap))
            }
        });

        result.unwrap_or_else(|err| {
            let config = err.downcast_ref::<EdenError>().is_some_and(EdenError::is_config);
            log::error!("[pipeline] {} x {id} aborted: {err:#}", region.uid);
            UnitResult::Failed(UnitFailure {
                region_uid: region.uid.clone(),
                raster: id,
                config,
                message: format!("{err:#}"),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, sync::Arc};

    use geo::{MultiPolygon, polygon};
    use ndarray::Array3;

    use super::Pipeline;
    use crate::{
        config::PipelineConfig,
        crs::{Bbox, Crs},
        qa::QaStatus,
        raster::{GeoTransform, MemRaster, RasterDescriptor, RasterLayer, RasterLocation, ValueKind},
        region::{CodeValue, Region, RegionSet, RegionSpec},
        zonal::{Stat, Status},
    };

    fn region(uid: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Region {
        Region {
            uid: uid.into(),
            scheme: "EPA_US".into(),
            level: 3,
            code: uid.into(),
            name: uid.into(),
            geometry: MultiPolygon(vec![polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]]),
            bbox: Bbox::new(x0, y0, x1, y1),
            area_km2: 1.0,
            dissolved: false,
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            regions: vec![RegionSpec {
                uid: "a".into(),
                scheme: "EPA_US".into(),
                level: 3,
                code: CodeValue::Int(1),
                name: None,
            }],
            ..PipelineConfig::default()
        }
    }

    fn layer(variable: &str, data: Array3<f64>, kind: ValueKind) -> RasterLayer {
        let height = data.dim().1;
        let bands = (0..data.dim().0).map(|b| format!("b{b}")).collect();
        let raster = MemRaster::new(GeoTransform::new(0.0, height as f64, 1.0, 1.0), data, None).unwrap();
        RasterLayer::new(RasterDescriptor {
            source: "mem".into(),
            variable: variable.into(),
            location: RasterLocation::Memory(Arc::new(raster)),
            crs: Some(Crs::WGS84),
            resolution: None,
            nodata: None,
            bands,
            kind,
        }).unwrap()
    }

    #[test]
    fn run_covers_every_unit_and_marks_gaps() {
        let regions = RegionSet::new(Crs::WGS84, vec![
            region("a", 0.0, 0.0, 4.0, 4.0),
            region("far", 50.0, 50.0, 51.0, 51.0),
        ], vec![]);
        let classes = BTreeMap::from([(1, "forest".to_string()), (2, "water".to_string())]);
        let layers = vec![
            layer("tmean", Array3::from_elem((1, 8, 8), 10.0), ValueKind::Continuous),
            layer("landcover", Array3::from_shape_fn((1, 8, 8), |(_, r, _)| if r < 4 { 1.0 } else { 2.0 }), ValueKind::Categorical { classes }),
        ];

        let pipeline = Pipeline::new(config()).unwrap();
        let out = pipeline.run(&regions, &layers).unwrap();

        assert!(out.report.failures.is_empty());
        assert_eq!(out.report.gaps.len(), 2);
        assert_eq!(out.features.uids(), ["a", "far"]);
        assert_eq!(out.features.get("a", "mem.tmean__mean"), Some(10.0));
        assert_eq!(out.features.get("far", "mem.tmean__mean"), None);
        // Region a sits in the lower half of the grid, all class 2.
        assert_eq!(out.features.get("a", "mem.landcover__water__pct"), Some(1.0));
        assert!(out.stats.iter().any(|r| r.region_uid == "far" && r.stat == Stat::Coverage && r.status == Status::CoverageGap));
        assert_eq!(out.qa.overall(), QaStatus::Fail);
    }

    #[test]
    fn band_mismatch_fails_only_its_unit() {
        let regions = RegionSet::new(Crs::WGS84, vec![region("a", 0.0, 0.0, 2.0, 2.0)], vec![]);
        let good = layer("tmean", Array3::from_elem((1, 4, 4), 1.0), ValueKind::Continuous);
        let mut descriptor = layer("ppt", Array3::from_elem((1, 4, 4), 1.0), ValueKind::Continuous).descriptor().clone();
        descriptor.bands.push("extra".into());
        let bad = RasterLayer::Continuous(descriptor);

        let out = Pipeline::new(config()).unwrap().run(&regions, &[good, bad]).unwrap();
        assert_eq!(out.report.failures.len(), 1);
        assert!(out.report.failures[0].config);
        assert_eq!(out.report.failures[0].raster, "mem/ppt");
        assert_eq!(out.features.get("a", "mem.tmean__mean"), Some(1.0));
    }

    #[test]
    fn dedicated_pool_gives_identical_results() {
        let regions = RegionSet::new(Crs::WGS84, (0..6)
            .map(|i| region(&format!("r{i}"), i as f64, 0.0, i as f64 + 2.5, 3.3))
            .collect(), vec![]);
        let data = Array3::from_shape_fn((2, 6, 10), |(b, r, c)| ((b + 1) * (r * 7 + c * 3) % 11) as f64 / 7.0);
        let layers = vec![layer("x", data, ValueKind::Continuous)];

        let default = Pipeline::new(config()).unwrap().run(&regions, &layers).unwrap();
        let pooled = Pipeline::new(PipelineConfig { threads: Some(2), ..config() }).unwrap().run(&regions, &layers).unwrap();
        assert_eq!(default.stats, pooled.stats);
        assert_eq!(default.features, pooled.features);
    }

    #[test]
    fn write_emits_manifest_with_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let regions = RegionSet::new(Crs::WGS84, vec![region("a", 0.0, 0.0, 2.0, 2.0)], vec![]);
        let layers = vec![layer("tmean", Array3::from_elem((1, 4, 4), 3.0), ValueKind::Continuous)];
        let out = Pipeline::new(config()).unwrap().run(&regions, &layers).unwrap();
        let paths = out.write(dir.path(), crate::config::OutputFormat::Csv, "sig").unwrap();
        assert_eq!(paths.len(), 4);

        let manifest: serde_json::Value = serde_json::from_slice(&std::fs::read(dir.path().join("manifest.json")).unwrap()).unwrap();
        assert_eq!(manifest["signature"], "sig");
        assert_eq!(manifest["counts"]["features"], 1);
        assert_eq!(manifest["files"]["zonal_stats.csv"]["sha256"].as_str().unwrap().len(), 64);
    }
}
