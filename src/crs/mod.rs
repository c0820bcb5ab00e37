mod bbox;
mod crs;
mod transform;
mod wkt;

pub use bbox::Bbox;
pub use crs::Crs;
pub use transform::Transformer;
pub(crate) use transform::DENSIFY_POINTS;
