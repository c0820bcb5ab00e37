//! Feature table assembly: long-form statistics pivoted to one row per region.

mod table;

pub use table::{FeatureTable, assemble};
