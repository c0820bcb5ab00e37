use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use shapefile::{Reader, Shape, dbase::Record};
use walkdir::WalkDir;

/// Reads all shapes + attribute records from a given `.shp` file path.
pub(crate) fn read_shapefile(path: &Path) -> Result<Vec<(Shape, Record)>> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open shapefile: {}", path.display()))?;

    let mut items = Vec::with_capacity(reader.shape_count()?);
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result
            .with_context(|| format!("Error reading shape+record from {}", path.display()))?;
        items.push((shape, record));
    }
    Ok(items)
}

/// Resolve a `.shp` path: the path itself, or the first `.shp` found under a directory
/// (sorted walk, so the choice is stable).
pub(crate) fn find_shapefile(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .find(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("shp")))
        .ok_or_else(|| anyhow!("No .shp file found under {}", path.display()))
}

/// Contents of the `.prj` sidecar next to a `.shp`, if present.
pub(crate) fn read_prj_sidecar(shp_path: &Path) -> Result<Option<String>> {
    let prj = shp_path.with_extension("prj");
    if !prj.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&prj)
        .with_context(|| format!("Failed to read {}", prj.display()))?;
    Ok(Some(text))
}
