use std::{collections::{BTreeMap, BTreeSet}, path::{Path, PathBuf}};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::{
    common::{canonical_json, sha256_hex},
    crs::{Crs, Transformer},
    error::EdenError,
    raster::RasterDescriptor,
    region::{RegionSpec, normalize_code},
};

/// Immutable run configuration, passed explicitly to every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// CRS of the canonical region geometry and of window requests.
    #[serde(default)]
    pub working_crs: Crs,
    /// Equal-area CRS used for `area_km2`.
    #[serde(default = "default_area_crs")]
    pub area_crs: Crs,
    #[serde(default)]
    pub boundaries: Vec<BoundaryConfig>,
    pub regions: Vec<RegionSpec>,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub rasters: Vec<RasterDescriptor>,
    #[serde(default)]
    pub zonal: ZonalConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub qa: QaConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Worker threads for the region x raster fan-out; rayon's global pool when unset.
    #[serde(default)]
    pub threads: Option<usize>,
}

/// A raw boundary dataset serving one (scheme, level).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoundaryConfig {
    pub scheme: String,
    pub level: u32,
    /// A `.shp` file, or a directory searched for the first `.shp`.
    pub path: PathBuf,
    #[serde(default)]
    pub code_field: Option<String>,
    #[serde(default)]
    pub name_field: Option<String>,
    /// Overrides the `.prj` sidecar.
    #[serde(default)]
    pub crs: Option<Crs>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Union all parts of a region into one geometry.
    pub dissolve: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ZonalConfig {
    /// Also emit median, q25, q75 and iqr for continuous layers.
    pub quantiles: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowConfig {
    /// Clipped-window cache root; caching is off when unset.
    pub cache_dir: Option<PathBuf>,
    /// Timeout for remote reads.
    pub timeout_secs: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { cache_dir: None, timeout_secs: 60 }
    }
}

/// Inclusive bounds for a variable's values; either side may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueRange {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl ValueRange {
    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QaConfig {
    /// Allowed deviation of a categorical pct sum from 1.
    pub pct_sum_tolerance: f64,
    /// Fraction of non-ok groups per source above which null_rate fails.
    pub null_rate_threshold: f64,
    /// Plausible value ranges keyed by variable name.
    pub value_ranges: BTreeMap<String, ValueRange>,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            pct_sum_tolerance: 1e-3,
            null_rate_threshold: 0.1,
            value_ranges: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Parquet => "parquet",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub dir: PathBuf,
    pub format: OutputFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { dir: PathBuf::from("out"), format: OutputFormat::Csv }
    }
}

fn default_area_crs() -> Crs { Crs::Epsg(5070) }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            working_crs: Crs::default(),
            area_crs: default_area_crs(),
            boundaries: Vec::new(),
            regions: Vec::new(),
            registry: RegistryConfig::default(),
            rasters: Vec::new(),
            zonal: ZonalConfig::default(),
            window: WindowConfig::default(),
            qa: QaConfig::default(),
            output: OutputConfig::default(),
            threads: None,
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(text)
            .context("Failed to parse pipeline configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    /// Relative boundary and raster paths resolve against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config = Self::from_json_str(&text)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let rebase = |p: &mut PathBuf| if p.is_relative() { *p = base.join(&*p) };
        self.boundaries.iter_mut().for_each(|b| rebase(&mut b.path));
        self.rasters.iter_mut().for_each(|r| r.rebase_local_path(base));
        if let Some(dir) = self.window.cache_dir.as_mut() { rebase(dir) }
        rebase(&mut self.output.dir);
    }

    /// Reject structurally invalid configurations before any work starts.
    pub fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            bail!(EdenError::config("regions", "no regions configured"));
        }

        let mut uids = BTreeSet::new();
        let mut codes = BTreeSet::new();
        for spec in &self.regions {
            if spec.uid.trim().is_empty() {
                bail!(EdenError::config(format!("{spec:?}"), "region uid is empty"));
            }
            if !uids.insert(spec.uid.as_str()) {
                bail!(EdenError::config(&spec.uid, "duplicate region uid"));
            }
            let code = normalize_code(&spec.code.to_string());
            if code.is_empty() {
                bail!(EdenError::config(&spec.uid, format!("region code {:?} is missing or invalid", spec.code.to_string())));
            }
            if !codes.insert((spec.scheme.clone(), spec.level, code.clone())) {
                bail!(EdenError::config(
                    &spec.uid,
                    format!("duplicate code {code} for scheme {} level {}; codes must be unique per scheme and level", spec.scheme, spec.level),
                ));
            }
        }

        let mut served = BTreeSet::new();
        for boundary in &self.boundaries {
            if !served.insert((boundary.scheme.as_str(), boundary.level)) {
                bail!(EdenError::config(
                    boundary.path.display().to_string(),
                    format!("more than one boundary source for scheme {} level {}", boundary.scheme, boundary.level),
                ));
            }
        }

        let mut layers = BTreeSet::new();
        for raster in &self.rasters {
            raster.validate()?;
            if !layers.insert((raster.source.as_str(), raster.variable.as_str())) {
                bail!(EdenError::config(raster.identity(), "duplicate source/variable pair"));
            }
        }

        for (variable, range) in &self.qa.value_ranges {
            if let (Some(min), Some(max)) = (range.min, range.max) {
                if min > max {
                    bail!(EdenError::config(variable, format!("value range min {min} > max {max}")));
                }
            }
        }
        if !(self.qa.pct_sum_tolerance >= 0.0) {
            bail!(EdenError::config("qa.pct_sum_tolerance", "must be a non-negative number"));
        }
        if !(0.0..=1.0).contains(&self.qa.null_rate_threshold) {
            bail!(EdenError::config("qa.null_rate_threshold", "must lie in [0, 1]"));
        }
        if self.window.timeout_secs == 0 {
            bail!(EdenError::config("window.timeout_secs", "must be positive"));
        }
        if self.threads == Some(0) {
            bail!(EdenError::config("threads", "must be positive when set"));
        }

        // Both CRSs must be buildable.
        Transformer::new(&self.working_crs, &self.area_crs)
            .map_err(|e| EdenError::config(format!("{} / {}", self.working_crs, self.area_crs), e.to_string()))?;

        Ok(())
    }

    /// SHA-256 of the canonical JSON form; names a run in the output manifest.
    pub fn signature(&self) -> Result<String> {
        let value = serde_json::to_value(self)
            .context("Failed to serialize configuration for signature")?;
        Ok(sha256_hex(canonical_json(&value).as_bytes()))
    }
}
