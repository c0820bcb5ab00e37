//! Raster window provider: clip rasters to region bounding boxes on their native grid.

mod cache;
mod descriptor;
mod geotiff;
mod grid;
mod mem;
mod provider;
#[cfg(feature = "remote")]
mod remote;

pub use cache::WindowCache;
pub use descriptor::{RasterDescriptor, RasterLayer, RasterLocation, ValueKind};
pub use grid::{GeoTransform, PixelWindow};
pub use mem::MemRaster;
pub use provider::{ClippedRaster, CoverageGap, GapReason, WindowOutcome, WindowProvider};
