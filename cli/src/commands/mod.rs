pub mod features;
pub mod qa;
pub mod regions;
pub mod zonal;
