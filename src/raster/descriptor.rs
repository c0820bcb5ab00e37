use std::{collections::BTreeMap, path::{Path, PathBuf}, sync::Arc};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use super::MemRaster;
use crate::{crs::Crs, error::EdenError};

/// Where a raster's pixels live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RasterLocation {
    /// A GeoTIFF on the local filesystem.
    Local { path: PathBuf },
    /// A GeoTIFF served over HTTP(S) with range request support.
    Remote { url: String },
    /// Pixels already in memory; never cached.
    #[serde(skip)]
    Memory(Arc<MemRaster>),
}

/// How a raster's values are interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueKind {
    Continuous,
    /// Integer class codes with their labels.
    Categorical { classes: BTreeMap<i64, String> },
}

/// Metadata describing one raster variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RasterDescriptor {
    pub source: String,
    pub variable: String,
    pub location: RasterLocation,
    #[serde(default)]
    pub crs: Option<Crs>,
    /// Nominal pixel size in CRS units.
    #[serde(default)]
    pub resolution: Option<f64>,
    /// Overrides the file's nodata value.
    #[serde(default)]
    pub nodata: Option<f64>,
    /// One label per band, in file order.
    #[serde(default)]
    pub bands: Vec<String>,
    pub kind: ValueKind,
}

impl RasterDescriptor {
    /// `source/variable`, used to name the raster in messages.
    pub fn identity(&self) -> String {
        format!("{}/{}", self.source, self.variable)
    }

    /// Reject descriptors missing mandatory metadata.
    pub fn validate(&self) -> Result<()> {
        let id = self.identity();
        if self.source.trim().is_empty() || self.variable.trim().is_empty() {
            bail!(EdenError::config(id, "source and variable must be non-empty"));
        }
        // `.` and `__` separate the parts of feature column names.
        let names = [("source", &self.source), ("variable", &self.variable)].into_iter()
            .chain(self.bands.iter().map(|band| ("band", band)));
        for (what, name) in names {
            if name.contains('.') || name.contains("__") {
                bail!(EdenError::config(&id, format!("{what} {name:?} must not contain '.' or '__'")));
            }
        }
        if self.crs.is_none() {
            bail!(EdenError::config(id, "missing crs"));
        }
        if self.bands.is_empty() {
            bail!(EdenError::config(id, "band list is empty"));
        }
        if let Some(res) = self.resolution {
            if !(res > 0.0) {
                bail!(EdenError::config(id, format!("resolution must be positive, got {res}")));
            }
        }
        if let ValueKind::Categorical { classes } = &self.kind {
            if classes.is_empty() {
                bail!(EdenError::config(id, "categorical raster has no class map"));
            }
        }
        match &self.location {
            RasterLocation::Local { path } if path.as_os_str().is_empty() => {
                bail!(EdenError::config(id, "empty local path"));
            }
            RasterLocation::Remote { url } if !(url.starts_with("http://") || url.starts_with("https://")) => {
                bail!(EdenError::config(id, format!("remote url must be http(s): {url}")));
            }
            RasterLocation::Memory(raster) if raster.bands() != self.bands.len() => {
                bail!(EdenError::config(
                    id,
                    format!("descriptor lists {} bands but raster has {}", self.bands.len(), raster.bands()),
                ));
            }
            _ => {}
        }
        Ok(())
    }

    /// Stable identity of the pixel source, `None` for in-memory rasters.
    pub(crate) fn location_key(&self) -> Option<String> {
        match &self.location {
            RasterLocation::Local { path } => Some(path.display().to_string()),
            RasterLocation::Remote { url } => Some(url.clone()),
            RasterLocation::Memory(_) => None,
        }
    }

    pub(crate) fn rebase_local_path(&mut self, base: &Path) {
        if let RasterLocation::Local { path } = &mut self.location {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// A validated raster, split by value kind.
#[derive(Debug, Clone, PartialEq)]
pub enum RasterLayer {
    Continuous(RasterDescriptor),
    Categorical(RasterDescriptor),
}

impl RasterLayer {
    pub fn new(descriptor: RasterDescriptor) -> Result<Self> {
        descriptor.validate()?;
        Ok(match descriptor.kind {
            ValueKind::Continuous => RasterLayer::Continuous(descriptor),
            ValueKind::Categorical { .. } => RasterLayer::Categorical(descriptor),
        })
    }

    pub fn descriptor(&self) -> &RasterDescriptor {
        match self {
            RasterLayer::Continuous(d) | RasterLayer::Categorical(d) => d,
        }
    }

    #[inline] pub fn kind(&self) -> &ValueKind { &self.descriptor().kind }

    #[inline] pub fn identity(&self) -> String { self.descriptor().identity() }

    /// Raster CRS; present after validation.
    pub(crate) fn crs(&self) -> Result<&Crs> {
        self.descriptor().crs.as_ref()
            .ok_or_else(|| EdenError::config(self.identity(), "missing crs").into())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::{RasterDescriptor, RasterLayer, RasterLocation, ValueKind};
    use crate::crs::Crs;

    fn descriptor() -> RasterDescriptor {
        RasterDescriptor {
            source: "prism".into(),
            variable: "tmean".into(),
            location: RasterLocation::Local { path: "tmean.tif".into() },
            crs: Some(Crs::Epsg(4269)),
            resolution: Some(0.04),
            nodata: None,
            bands: vec!["annual".into()],
            kind: ValueKind::Continuous,
        }
    }

    #[test]
    fn json_descriptor_parses() {
        let d: RasterDescriptor = serde_json::from_str(r#"{
            "source": "nlcd", "variable": "landcover",
            "location": {"type": "remote", "url": "https://example.org/nlcd.tif"},
            "crs": "EPSG:5070", "nodata": 0, "bands": ["2019"],
            "kind": {"type": "categorical", "classes": {"11": "water", "41": "forest"}}
        }"#).unwrap();
        let ValueKind::Categorical { classes } = &d.kind else { panic!("categorical expected") };
        assert_eq!(classes[&41], "forest");
        assert!(matches!(RasterLayer::new(d).unwrap(), RasterLayer::Categorical(_)));
    }

    #[test]
    fn missing_metadata_is_rejected_with_identity() {
        let mut d = descriptor();
        d.crs = None;
        assert!(d.validate().unwrap_err().to_string().contains("prism/tmean"));

        let mut d = descriptor();
        d.bands.clear();
        assert!(d.validate().is_err());

        let mut d = descriptor();
        d.kind = ValueKind::Categorical { classes: BTreeMap::new() };
        assert!(RasterLayer::new(d).is_err());

        let mut d = descriptor();
        d.location = RasterLocation::Remote { url: "ftp://x".into() };
        assert!(d.validate().is_err());
    }

    #[test]
    fn names_reserved_for_feature_columns_are_rejected() {
        let mut d = descriptor();
        d.variable = "ppt.jan".into();
        assert!(d.validate().unwrap_err().to_string().contains("variable"));

        let mut d = descriptor();
        d.source = "world__clim".into();
        assert!(d.validate().is_err());

        let mut d = descriptor();
        d.bands = vec!["2019.06".into()];
        assert!(d.validate().is_err());

        let mut d = descriptor();
        d.variable = "ppt_jan".into();
        assert!(d.validate().is_ok());
    }

    #[test]
    fn relative_local_paths_are_rebased() {
        let mut d = descriptor();
        d.rebase_local_path(std::path::Path::new("/data"));
        assert_eq!(d.location, RasterLocation::Local { path: "/data/tmean.tif".into() });
    }
}
