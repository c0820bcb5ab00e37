use std::{fmt, path::{Path, PathBuf}};

use anyhow::Result;
use polars::prelude::{Column, DataFrame};
use serde::{Deserialize, Serialize};

use crate::{common::write_table, config::OutputFormat};

/// Outcome of one QA check, ordered from best to worst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaStatus {
    #[default]
    Pass,
    Warn,
    Fail,
}

impl QaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QaStatus::Pass => "pass",
            QaStatus::Warn => "warn",
            QaStatus::Fail => "fail",
        }
    }
}

impl fmt::Display for QaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaFlag {
    /// `None` for source-level checks.
    pub region_uid: Option<String>,
    pub check_name: String,
    pub status: QaStatus,
    pub detail: String,
}

impl QaFlag {
    pub fn new(region_uid: Option<&str>, check_name: &str, status: QaStatus, detail: impl Into<String>) -> Self {
        Self {
            region_uid: region_uid.map(str::to_string),
            check_name: check_name.to_string(),
            status,
            detail: detail.into(),
        }
    }
}

/// All flags of a QA pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QaReport {
    flags: Vec<QaFlag>,
}

impl QaReport {
    pub fn new(flags: Vec<QaFlag>) -> Self { Self { flags } }

    #[inline] pub fn flags(&self) -> &[QaFlag] { &self.flags }

    /// Worst status across all flags; `Pass` when there are none.
    pub fn overall(&self) -> QaStatus {
        self.flags.iter().map(|f| f.status).max().unwrap_or_default()
    }

    /// `(pass, warn, fail)` counts.
    pub fn counts(&self) -> (usize, usize, usize) {
        self.flags.iter().fold((0, 0, 0), |(p, w, f), flag| match flag.status {
            QaStatus::Pass => (p + 1, w, f),
            QaStatus::Warn => (p, w + 1, f),
            QaStatus::Fail => (p, w, f + 1),
        })
    }

    /// Flags that need an operator's attention.
    pub fn issues(&self) -> impl Iterator<Item = &QaFlag> {
        self.flags.iter().filter(|f| f.status != QaStatus::Pass)
    }

    pub fn to_frame(&self) -> Result<DataFrame> {
        let f = &self.flags;
        Ok(DataFrame::new(vec![
            Column::new("region_uid".into(), f.iter().map(|f| f.region_uid.as_deref()).collect::<Vec<_>>()),
            Column::new("check_name".into(), f.iter().map(|f| f.check_name.as_str()).collect::<Vec<_>>()),
            Column::new("status".into(), f.iter().map(|f| f.status.as_str()).collect::<Vec<_>>()),
            Column::new("detail".into(), f.iter().map(|f| f.detail.as_str()).collect::<Vec<_>>()),
        ])?)
    }

    /// Write `qa_flags.<ext>` into `dir`.
    pub fn write(&self, dir: &Path, format: OutputFormat) -> Result<PathBuf> {
        write_table(&mut self.to_frame()?, dir, "qa_flags", format)
    }
}

impl fmt::Display for QaReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (pass, warn, fail) = self.counts();
        writeln!(f, "QA {}: {pass} pass, {warn} warn, {fail} fail", self.overall())?;
        for flag in self.issues() {
            let scope = flag.region_uid.as_deref().unwrap_or("*");
            writeln!(f, "  [{}] {} {scope}: {}", flag.status, flag.check_name, flag.detail)?;
        }
        Ok(())
    }
}
