use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use ahash::AHashMap;
use anyhow::{Context, Result};
use polars::prelude::{Column, DataFrame, DataType};

use crate::{
    common::{read_table, write_table},
    config::OutputFormat,
    zonal::{Stat, StatsTable, Status, ZonalRecord},
};

const UID_COLUMN: &str = "region_uid";

/// Wide-form features: one row per region uid, one nullable column per feature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    uids: Vec<String>,
    columns: BTreeMap<String, Vec<Option<f64>>>,
}

impl FeatureTable {
    /// A table with one all-null row per uid and no feature columns.
    pub fn empty<S: AsRef<str>>(uids: &[S]) -> Self {
        Self { uids: uids.iter().map(|u| u.as_ref().to_string()).collect(), columns: BTreeMap::new() }
    }

    #[inline] pub fn uids(&self) -> &[String] { &self.uids }

    #[inline] pub fn height(&self) -> usize { self.uids.len() }

    /// Feature column names in lexicographic order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(String::as_str).collect()
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn get(&self, uid: &str, column: &str) -> Option<f64> {
        let row = self.uids.iter().position(|u| u == uid)?;
        self.columns.get(column)?[row]
    }

    /// Additive schema evolution: rows follow `newer`, newer columns replace
    /// same-named ones, and columns only present here are carried over.
    pub fn merge(self, newer: FeatureTable) -> FeatureTable {
        let old_rows = self.uids.iter().enumerate()
            .map(|(i, uid)| (uid.as_str(), i))
            .collect::<AHashMap<_, _>>();
        let mut columns = BTreeMap::new();
        for (name, values) in &self.columns {
            if newer.columns.contains_key(name) {
                continue;
            }
            let remapped = newer.uids.iter()
                .map(|uid| old_rows.get(uid.as_str()).and_then(|&i| values[i]))
                .collect();
            columns.insert(name.clone(), remapped);
        }
        columns.extend(newer.columns);
        FeatureTable { uids: newer.uids, columns }
    }

    pub fn to_frame(&self) -> Result<DataFrame> {
        let mut frame = Vec::with_capacity(self.columns.len() + 1);
        frame.push(Column::new(UID_COLUMN.into(), self.uids.iter().map(String::as_str).collect::<Vec<_>>()));
        for (name, values) in &self.columns {
            frame.push(Column::new(name.as_str().into(), values.clone()));
        }
        Ok(DataFrame::new(frame)?)
    }

    pub fn from_frame(df: &DataFrame) -> Result<Self> {
        let uids = df.column(UID_COLUMN)
            .context("feature table has no region_uid column")?
            .cast(&DataType::String)?;
        let uids = uids.str()?.into_iter()
            .enumerate()
            .map(|(i, u)| u.map(str::to_string).with_context(|| format!("feature table row {i} has no region_uid")))
            .collect::<Result<Vec<_>>>()?;

        let mut columns = BTreeMap::new();
        for column in df.get_columns() {
            let name = column.name().as_str();
            if name == UID_COLUMN {
                continue;
            }
            let values = column.cast(&DataType::Float64)?;
            columns.insert(name.to_string(), values.f64()?.into_iter().collect());
        }
        Ok(Self { uids, columns })
    }

    /// Write `features.<ext>` into `dir`.
    pub fn write(&self, dir: &Path, format: OutputFormat) -> Result<PathBuf> {
        write_table(&mut self.to_frame()?, dir, "features", format)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let df = read_table(path, &[UID_COLUMN])?;
        Self::from_frame(&df).with_context(|| format!("Invalid feature table {}", path.display()))
    }
}

/// Pivot long-form statistics into one row per `uids` entry, in that order.
///
/// Continuous stats become `{source}.{variable}__{stat}`, categorical shares
/// `{source}.{variable}__{category}__pct`; multi-band rasters add the band as
/// `{source}.{variable}.{band}`. A column name depends only on its own raster,
/// so tables from separate runs merge without clobbering each other.
/// Diagnostics and per-class counts are skipped; anything missing stays null.
pub fn assemble<S: AsRef<str>>(stats: &StatsTable, uids: &[S]) -> FeatureTable {
    let mut table = FeatureTable::empty(uids);
    let rows = table.uids.iter().enumerate()
        .map(|(i, uid)| (uid.clone(), i))
        .collect::<AHashMap<_, _>>();

    let mut bands_of = BTreeMap::<(&str, &str), BTreeSet<&str>>::new();
    for r in stats.iter() {
        bands_of.entry((r.source.as_str(), r.variable.as_str())).or_default().insert(r.band.as_str());
    }

    let mut unknown = BTreeSet::new();
    let height = table.uids.len();
    for r in stats.iter() {
        let Some(name) = feature_name(r, &bands_of) else { continue };
        let Some(&row) = rows.get(&r.region_uid) else {
            unknown.insert(r.region_uid.as_str());
            continue;
        };
        let column = table.columns.entry(name).or_insert_with(|| vec![None; height]);
        if r.status == Status::Ok {
            if let Some(value) = r.value {
                column[row] = Some(value);
            }
        }
    }
    for uid in unknown {
        log::warn!("[features] statistics for {uid} have no registry row; skipped");
    }
    log::info!("[features] {} rows x {} columns", table.height(), table.columns.len());
    table
}

fn feature_name(r: &ZonalRecord, bands_of: &BTreeMap<(&str, &str), BTreeSet<&str>>) -> Option<String> {
    if r.stat.is_diagnostic() {
        return None;
    }
    let mut base = format!("{}.{}", r.source, r.variable);
    if bands_of.get(&(r.source.as_str(), r.variable.as_str())).is_some_and(|b| b.len() > 1) {
        base.push('.');
        base.push_str(&r.band);
    }

    match (&r.category, r.stat) {
        (Some(category), Stat::Pct) => Some(format!("{base}__{category}__pct")),
        (Some(_), _) => None,
        (None, stat) => Some(format!("{base}__{stat}")),
    }
}

#[cfg(test)]
mod tests {
    use super::{FeatureTable, assemble};
    use crate::{
        config::OutputFormat,
        zonal::{Stat, StatsTable, Status, ZonalRecord},
    };

    fn rec(uid: &str, source: &str, variable: &str, band: &str, stat: Stat, category: Option<&str>, value: Option<f64>) -> ZonalRecord {
        ZonalRecord {
            region_uid: uid.into(),
            source: source.into(),
            variable: variable.into(),
            band: band.into(),
            stat,
            category: category.map(str::to_string),
            value,
            status: if value.is_some() { Status::Ok } else { Status::CoverageGap },
        }
    }

    #[test]
    fn naming_rules_and_registry_driven_rows() {
        let stats = StatsTable::new(vec![
            rec("a", "prism", "tmean", "annual", Stat::Mean, None, Some(12.5)),
            rec("a", "prism", "tmean", "annual", Stat::BboxCoverage, None, Some(1.0)),
            rec("a", "nlcd", "landcover", "2019", Stat::Pct, Some("forest"), Some(0.6)),
            rec("a", "nlcd", "landcover", "2019", Stat::Count, Some("forest"), Some(6.0)),
            rec("a", "nlcd", "landcover", "2019", Stat::Count, None, Some(10.0)),
            rec("a", "worldclim", "ppt", "jan", Stat::Mean, None, Some(30.0)),
            rec("a", "worldclim", "ppt", "feb", Stat::Mean, None, Some(20.0)),
            rec("a", "chelsa", "ppt", "jan", Stat::Mean, None, Some(31.0)),
            rec("b", "prism", "tmean", "annual", Stat::Coverage, None, None),
        ]);
        let table = assemble(&stats, &["a", "b", "c"]);

        assert_eq!(table.column_names(), vec![
            "chelsa.ppt__mean",
            "nlcd.landcover__count",
            "nlcd.landcover__forest__pct",
            "prism.tmean__mean",
            "worldclim.ppt.feb__mean",
            "worldclim.ppt.jan__mean",
        ]);
        assert_eq!(table.uids(), ["a", "b", "c"]);
        assert_eq!(table.get("a", "prism.tmean__mean"), Some(12.5));
        assert_eq!(table.get("b", "prism.tmean__mean"), None);
        assert_eq!(table.get("c", "nlcd.landcover__forest__pct"), None);
    }

    #[test]
    fn band_names_cannot_collide_with_variables() {
        let table = assemble(&StatsTable::new(vec![
            rec("a", "worldclim", "ppt", "jan", Stat::Mean, None, Some(30.0)),
            rec("a", "worldclim", "ppt", "feb", Stat::Mean, None, Some(20.0)),
            rec("a", "worldclim", "ppt_jan", "annual", Stat::Mean, None, Some(99.0)),
        ]), &["a"]);
        assert_eq!(table.get("a", "worldclim.ppt.jan__mean"), Some(30.0));
        assert_eq!(table.get("a", "worldclim.ppt_jan__mean"), Some(99.0));
        assert_eq!(table.column_names().len(), 3);
    }

    #[test]
    fn later_source_with_same_variable_keeps_earlier_columns() {
        let worldclim = assemble(&StatsTable::new(vec![
            rec("a", "worldclim", "ppt", "annual", Stat::Mean, None, Some(30.0)),
        ]), &["a"]);
        let chelsa = assemble(&StatsTable::new(vec![
            rec("a", "chelsa", "ppt", "annual", Stat::Mean, None, Some(99.0)),
        ]), &["a"]);

        let merged = worldclim.merge(chelsa);
        assert_eq!(merged.column_names(), vec!["chelsa.ppt__mean", "worldclim.ppt__mean"]);
        assert_eq!(merged.get("a", "worldclim.ppt__mean"), Some(30.0));
        assert_eq!(merged.get("a", "chelsa.ppt__mean"), Some(99.0));
    }

    #[test]
    fn merge_adds_columns_and_prefers_newer() {
        let old = assemble(&StatsTable::new(vec![
            rec("a", "s", "x", "1", Stat::Mean, None, Some(1.0)),
            rec("a", "s", "y", "1", Stat::Mean, None, Some(2.0)),
        ]), &["a"]);
        let new = assemble(&StatsTable::new(vec![
            rec("a", "s", "y", "1", Stat::Mean, None, Some(3.0)),
            rec("b", "s", "y", "1", Stat::Mean, None, Some(4.0)),
        ]), &["a", "b"]);
        let merged = old.merge(new);
        assert_eq!(merged.column_names(), vec!["s.x__mean", "s.y__mean"]);
        assert_eq!(merged.column("s.x__mean").unwrap(), &[Some(1.0), None]);
        assert_eq!(merged.column("s.y__mean").unwrap(), &[Some(3.0), Some(4.0)]);
    }

    #[test]
    fn csv_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let table = assemble(&StatsTable::new(vec![
            rec("007", "s", "x", "1", Stat::Mean, None, Some(1.25)),
        ]), &["007", "008"]);
        let path = table.write(dir.path(), OutputFormat::Csv).unwrap();
        assert_eq!(FeatureTable::read(&path).unwrap(), table);
    }
}
