mod fs;
mod geojson;
mod hash;
mod polygon;
mod shp;
mod table;

pub(crate) use fs::*;
pub(crate) use geojson::*;
pub(crate) use hash::*;
pub(crate) use polygon::*;
pub(crate) use shp::*;
pub(crate) use table::*;
