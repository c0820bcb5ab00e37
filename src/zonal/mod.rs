//! Zonal aggregator: per-region statistics over clipped rasters.

mod mask;
mod record;
mod stats;
mod table;

pub use record::{Stat, Status, ZonalRecord};
pub use stats::{aggregate, gap_records};
pub use table::StatsTable;

pub(crate) use stats::aggregate_with;
