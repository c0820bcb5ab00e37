//! Region registry: select, repair, measure and reproject ecoregion boundaries.

mod code;
mod registry;
mod repair;
mod set;
mod source;

use serde::{Deserialize, Serialize};

pub use code::{CodeValue, normalize_code};
pub use registry::prepare_regions;
pub use set::{DroppedFeature, Region, RegionSet};
pub use source::{AttrValue, BoundarySource, MemBoundaries, RawFeature, ShapefileBoundaries};

/// A configured region: which raw feature(s) to select and what to call them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionSpec {
    pub uid: String,
    pub scheme: String,
    pub level: u32,
    pub code: CodeValue,
    #[serde(default)]
    pub name: Option<String>,
}
