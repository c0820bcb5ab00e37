#![doc = "EDEN zonal pipeline public API"]
mod common;
mod config;
mod crs;
mod error;
mod features;
mod pipeline;
mod qa;
mod raster;
mod region;
mod zonal;

#[doc(inline)]
pub use config::{
    BoundaryConfig, OutputConfig, OutputFormat, PipelineConfig, QaConfig, RegistryConfig,
    ValueRange, WindowConfig, ZonalConfig,
};

#[doc(inline)]
pub use crs::{Bbox, Crs, Transformer};

#[doc(inline)]
pub use error::EdenError;

#[doc(inline)]
pub use region::{
    AttrValue, BoundarySource, CodeValue, DroppedFeature, MemBoundaries, RawFeature, Region,
    RegionSet, RegionSpec, ShapefileBoundaries, normalize_code, prepare_regions,
};

#[doc(inline)]
pub use raster::{
    ClippedRaster, CoverageGap, GapReason, GeoTransform, MemRaster, PixelWindow, RasterDescriptor,
    RasterLayer, RasterLocation, ValueKind, WindowCache, WindowOutcome, WindowProvider,
};

#[doc(inline)]
pub use zonal::{Stat, StatsTable, Status, ZonalRecord, aggregate, gap_records};

#[doc(inline)]
pub use qa::{QaChecker, QaFlag, QaReport, QaRule, QaStatus};

#[doc(inline)]
pub use features::{FeatureTable, assemble};

#[doc(inline)]
pub use pipeline::{Pipeline, RunOutput, RunReport, UnitFailure};
