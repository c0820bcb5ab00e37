use std::{collections::{BTreeMap, BTreeSet}, fmt, path::{Path, PathBuf}};

use anyhow::{Context, Result, bail};
use geo::MultiPolygon;
use shapefile::dbase::{FieldValue, Record};

use crate::{
    common::{find_shapefile, read_prj_sidecar, read_shapefile, shape_to_geo},
    config::BoundaryConfig,
    crs::Crs,
    error::EdenError,
};

/// A raw attribute value from a boundary dataset.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Number(f64),
    Null,
}

impl AttrValue {
    fn from_field(value: &FieldValue) -> Self {
        match value {
            FieldValue::Character(Some(s)) => AttrValue::Text(s.trim().to_string()),
            FieldValue::Memo(s) => AttrValue::Text(s.trim().to_string()),
            FieldValue::Numeric(Some(n)) => AttrValue::Number(*n),
            FieldValue::Float(Some(f)) => AttrValue::Number(f64::from(*f)),
            FieldValue::Integer(i) => AttrValue::Number(f64::from(*i)),
            FieldValue::Double(d) => AttrValue::Number(*d),
            _ => AttrValue::Null,
        }
    }
}

impl fmt::Display for AttrValue {
    /// Integral numbers print without a fractional part, so `7.0` reads as `7`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Text(s) => f.write_str(s),
            AttrValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            AttrValue::Number(n) => write!(f, "{n}"),
            AttrValue::Null => Ok(()),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self { AttrValue::Text(s.to_string()) }
}

impl From<f64> for AttrValue {
    fn from(n: f64) -> Self { AttrValue::Number(n) }
}

/// One raw boundary feature. `geometry` is `None` for non-polygonal shapes.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeature {
    pub index: usize,
    pub geometry: Option<MultiPolygon<f64>>,
    pub attributes: BTreeMap<String, AttrValue>,
}

/// Read-only access to raw boundary features serving one (scheme, level).
pub trait BoundarySource: Send + Sync {
    /// Identity used in logs and error messages.
    fn name(&self) -> &str;
    fn scheme(&self) -> &str;
    fn level(&self) -> u32;
    fn crs(&self) -> &Crs;
    /// Attribute column names, sorted.
    fn columns(&self) -> Vec<String>;
    fn features(&self) -> &[RawFeature];
    /// Explicit code column; inferred from column names when `None`.
    fn code_field(&self) -> Option<&str> { None }
    /// Column used for region names not given in configuration.
    fn name_field(&self) -> Option<&str> { None }
}

fn columns_of(features: &[RawFeature]) -> Vec<String> {
    features.iter()
        .flat_map(|f| f.attributes.keys().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Boundaries read from an ESRI shapefile.
pub struct ShapefileBoundaries {
    path: PathBuf,
    name: String,
    scheme: String,
    level: u32,
    crs: Crs,
    code_field: Option<String>,
    name_field: Option<String>,
    features: Vec<RawFeature>,
}

impl ShapefileBoundaries {
    /// Open the shapefile named by a boundary configuration.
    /// The CRS comes from the configuration override or the `.prj` sidecar.
    pub fn open(config: &BoundaryConfig) -> Result<Self> {
        let path = find_shapefile(&config.path)?;
        let name = path.display().to_string();

        let crs = match &config.crs {
            Some(crs) => crs.clone(),
            None => match read_prj_sidecar(&path)? {
                Some(wkt) => Crs::from_prj(&wkt)
                    .with_context(|| format!("Failed to interpret .prj of {name}"))?,
                None => bail!(EdenError::config(&name, "shapefile has no CRS (.prj missing); set crs explicitly")),
            },
        };

        let features = read_features(&path)?;
        if features.is_empty() {
            bail!(EdenError::config(&name, "shapefile contains zero features"));
        }
        log::info!("[registry] read {} features from {} ({crs})", features.len(), name);

        Ok(Self {
            path,
            name,
            scheme: config.scheme.clone(),
            level: config.level,
            crs,
            code_field: config.code_field.clone(),
            name_field: config.name_field.clone(),
            features,
        })
    }

    pub fn path(&self) -> &Path { &self.path }
}

fn read_features(path: &Path) -> Result<Vec<RawFeature>> {
    fn attributes(record: Record) -> BTreeMap<String, AttrValue> {
        record.into_iter()
            .map(|(field, value)| (field, AttrValue::from_field(&value)))
            .collect()
    }

    Ok(read_shapefile(path)?
        .into_iter()
        .enumerate()
        .map(|(index, (shape, record))| RawFeature {
            index,
            geometry: shape_to_geo(&shape),
            attributes: attributes(record),
        })
        .collect())
}

impl BoundarySource for ShapefileBoundaries {
    fn name(&self) -> &str { &self.name }
    fn scheme(&self) -> &str { &self.scheme }
    fn level(&self) -> u32 { self.level }
    fn crs(&self) -> &Crs { &self.crs }
    fn columns(&self) -> Vec<String> { columns_of(&self.features) }
    fn features(&self) -> &[RawFeature] { &self.features }
    fn code_field(&self) -> Option<&str> { self.code_field.as_deref() }
    fn name_field(&self) -> Option<&str> { self.name_field.as_deref() }
}

/// In-memory boundaries, for programmatic use and tests.
#[derive(Debug, Clone)]
pub struct MemBoundaries {
    name: String,
    scheme: String,
    level: u32,
    crs: Crs,
    code_field: Option<String>,
    features: Vec<RawFeature>,
}

impl MemBoundaries {
    pub fn new(name: impl Into<String>, scheme: impl Into<String>, level: u32, crs: Crs) -> Self {
        Self {
            name: name.into(),
            scheme: scheme.into(),
            level,
            crs,
            code_field: None,
            features: Vec::new(),
        }
    }

    /// Add a feature with the given attributes.
    pub fn with_feature(mut self, geometry: MultiPolygon<f64>, attributes: impl IntoIterator<Item = (&'static str, AttrValue)>) -> Self {
        let index = self.features.len();
        self.features.push(RawFeature {
            index,
            geometry: Some(geometry),
            attributes: attributes.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        });
        self
    }

    pub fn with_code_field(mut self, field: impl Into<String>) -> Self {
        self.code_field = Some(field.into());
        self
    }
}

impl BoundarySource for MemBoundaries {
    fn name(&self) -> &str { &self.name }
    fn scheme(&self) -> &str { &self.scheme }
    fn level(&self) -> u32 { self.level }
    fn crs(&self) -> &Crs { &self.crs }
    fn columns(&self) -> Vec<String> { columns_of(&self.features) }
    fn features(&self) -> &[RawFeature] { &self.features }
    fn code_field(&self) -> Option<&str> { self.code_field.as_deref() }
}
