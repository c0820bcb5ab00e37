use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use polars::prelude::{Column, DataFrame, DataType};

use super::{Stat, Status, ZonalRecord};
use crate::{
    common::{read_table, write_table},
    config::OutputFormat,
};

const STRING_COLUMNS: [&str; 7] = ["region_uid", "source", "variable", "band", "stat", "category", "status"];

/// Long-form statistics of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsTable {
    records: Vec<ZonalRecord>,
}

impl StatsTable {
    pub fn new(records: Vec<ZonalRecord>) -> Self { Self { records } }

    #[inline] pub fn records(&self) -> &[ZonalRecord] { &self.records }

    #[inline] pub fn len(&self) -> usize { self.records.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.records.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &ZonalRecord> { self.records.iter() }

    pub fn into_records(self) -> Vec<ZonalRecord> { self.records }

    /// Order by `(region_uid, source, variable)`, keeping emission order within a unit.
    pub fn sort(&mut self) {
        self.records.sort_by(|a, b| {
            (&a.region_uid, &a.source, &a.variable).cmp(&(&b.region_uid, &b.source, &b.variable))
        });
    }

    pub fn to_frame(&self) -> Result<DataFrame> {
        let r = &self.records;
        Ok(DataFrame::new(vec![
            Column::new("region_uid".into(), r.iter().map(|r| r.region_uid.as_str()).collect::<Vec<_>>()),
            Column::new("source".into(), r.iter().map(|r| r.source.as_str()).collect::<Vec<_>>()),
            Column::new("variable".into(), r.iter().map(|r| r.variable.as_str()).collect::<Vec<_>>()),
            Column::new("band".into(), r.iter().map(|r| r.band.as_str()).collect::<Vec<_>>()),
            Column::new("stat".into(), r.iter().map(|r| r.stat.as_str()).collect::<Vec<_>>()),
            Column::new("category".into(), r.iter().map(|r| r.category.as_deref()).collect::<Vec<_>>()),
            Column::new("value".into(), r.iter().map(|r| r.value).collect::<Vec<_>>()),
            Column::new("status".into(), r.iter().map(|r| r.status.as_str()).collect::<Vec<_>>()),
        ])?)
    }

    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        let text = |name: &str| -> Result<Vec<Option<String>>> {
            let column = df.column(name)
                .with_context(|| format!("statistics table has no {name:?} column"))?
                .cast(&DataType::String)?;
            Ok(column.str()?.into_iter().map(|v| v.map(str::to_string)).collect())
        };
        let required = |values: Vec<Option<String>>, name: &str| -> Result<Vec<String>> {
            values.into_iter().enumerate()
                .map(|(i, v)| v.ok_or_else(|| anyhow!("statistics table row {i}: {name} is null")))
                .collect()
        };

        let uids = required(text("region_uid")?, "region_uid")?;
        let sources = required(text("source")?, "source")?;
        let variables = required(text("variable")?, "variable")?;
        let bands = required(text("band")?, "band")?;
        let stats = required(text("stat")?, "stat")?;
        let statuses = required(text("status")?, "status")?;
        let categories = text("category")?;
        let values = df.column("value")
            .context("statistics table has no \"value\" column")?
            .cast(&DataType::Float64)?;
        let values = values.f64()?.into_iter().collect::<Vec<_>>();

        let mut records = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            records.push(ZonalRecord {
                region_uid: uids[i].clone(),
                source: sources[i].clone(),
                variable: variables[i].clone(),
                band: bands[i].clone(),
                stat: stats[i].parse::<Stat>().with_context(|| format!("statistics table row {i}"))?,
                category: categories[i].clone().filter(|c| !c.is_empty()),
                value: values[i],
                status: statuses[i].parse::<Status>().with_context(|| format!("statistics table row {i}"))?,
            });
        }
        Ok(Self { records })
    }

    /// Write `zonal_stats.<ext>` into `dir`.
    pub fn write(&self, dir: &Path, format: OutputFormat) -> Result<PathBuf> {
        write_table(&mut self.to_frame()?, dir, "zonal_stats", format)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let df = read_table(path, &STRING_COLUMNS)?;
        Self::from_frame(&df).with_context(|| format!("Invalid statistics table {}", path.display()))
    }
}

impl FromIterator<ZonalRecord> for StatsTable {
    fn from_iter<I: IntoIterator<Item = ZonalRecord>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
