use std::{collections::BTreeMap, path::{Path, PathBuf}};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    common::{sha256_file, write_atomic},
    config::OutputFormat,
};

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FileHash {
    sha256: String,
}

/// `manifest.json` of one output set.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RunManifest {
    signature: String,
    version: String,
    format: OutputFormat,
    counts: BTreeMap<String, usize>,
    files: BTreeMap<String, FileHash>,
}

impl RunManifest {
    /// `written` holds `(table name, path, row count)` per file.
    pub(crate) fn new(signature: &str, format: OutputFormat, written: &[(&str, PathBuf, usize)]) -> Result<Self> {
        let mut counts = BTreeMap::new();
        let mut files = BTreeMap::new();
        for (name, path, rows) in written {
            counts.insert(name.to_string(), *rows);
            let file_name = path.file_name()
                .and_then(|s| s.to_str())
                .with_context(|| format!("output path {} has no file name", path.display()))?;
            files.insert(file_name.to_string(), FileHash { sha256: sha256_file(path)? });
        }
        Ok(Self {
            signature: signature.to_string(),
            version: env!("CARGO_PKG_VERSION").into(),
            format,
            counts,
            files,
        })
    }

    pub(crate) fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join("manifest.json");
        let bytes = serde_json::to_vec_pretty(self).context("Failed to serialize run manifest")?;
        write_atomic(&path, &bytes)?;
        Ok(path)
    }
}
