use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Statistic carried by a zonal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stat {
    Count,
    Mean,
    Std,
    Min,
    Max,
    Median,
    Q25,
    Q75,
    Iqr,
    Pct,
    /// Marker of a band without statistics; always carries a non-ok status.
    Coverage,
    /// Fraction of the region bbox covered by the raster window.
    BboxCoverage,
}

impl Stat {
    pub const ALL: [Stat; 12] = [
        Stat::Count, Stat::Mean, Stat::Std, Stat::Min, Stat::Max, Stat::Median,
        Stat::Q25, Stat::Q75, Stat::Iqr, Stat::Pct, Stat::Coverage, Stat::BboxCoverage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stat::Count => "count",
            Stat::Mean => "mean",
            Stat::Std => "std",
            Stat::Min => "min",
            Stat::Max => "max",
            Stat::Median => "median",
            Stat::Q25 => "q25",
            Stat::Q75 => "q75",
            Stat::Iqr => "iqr",
            Stat::Pct => "pct",
            Stat::Coverage => "coverage",
            Stat::BboxCoverage => "bbox_coverage",
        }
    }

    /// Diagnostic stats are inputs to QA, never features.
    #[inline]
    pub fn is_diagnostic(&self) -> bool {
        matches!(self, Stat::Coverage | Stat::BboxCoverage)
    }
}

impl fmt::Display for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Stat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Stat::ALL.into_iter().find(|stat| stat.as_str() == s)
            .ok_or_else(|| anyhow!("unknown statistic {s:?}"))
    }
}

/// Outcome marker of a zonal record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Ok,
    /// The window had pixels but none valid inside the region.
    InsufficientCoverage,
    /// The raster could not supply a window for the region.
    CoverageGap,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ok => "ok",
            Status::InsufficientCoverage => "insufficient_coverage",
            Status::CoverageGap => "coverage_gap",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ok" => Ok(Status::Ok),
            "insufficient_coverage" => Ok(Status::InsufficientCoverage),
            "coverage_gap" => Ok(Status::CoverageGap),
            other => Err(anyhow!("unknown status {other:?}")),
        }
    }
}

/// One long-form statistic: `(region_uid, source, variable, band, stat, category, value, status)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonalRecord {
    pub region_uid: String,
    pub source: String,
    pub variable: String,
    pub band: String,
    pub stat: Stat,
    /// Class label for categorical per-class records.
    pub category: Option<String>,
    pub value: Option<f64>,
    pub status: Status,
}

impl ZonalRecord {
    /// `(region, source, variable, band)` grouping key.
    pub fn group(&self) -> (&str, &str, &str, &str) {
        (&self.region_uid, &self.source, &self.variable, &self.band)
    }
}

#[cfg(test)]
mod tests {
    use super::{Stat, Status};

    #[test]
    fn names_parse_back() {
        for stat in Stat::ALL {
            assert_eq!(stat.as_str().parse::<Stat>().unwrap(), stat);
        }
        assert_eq!("coverage_gap".parse::<Status>().unwrap(), Status::CoverageGap);
        assert!("average".parse::<Stat>().is_err());
        assert!(Stat::BboxCoverage.is_diagnostic() && !Stat::Pct.is_diagnostic());
    }
}
