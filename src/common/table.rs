use std::{fs::File, io::Cursor, path::{Path, PathBuf}, sync::Arc};

use anyhow::{Context, Result, bail};
use polars::{
    frame::DataFrame,
    io::{SerReader, SerWriter},
    prelude::{CsvReadOptions, CsvReader, CsvWriter, DataType, Field, Schema},
};
#[cfg(feature = "parquet")]
use polars::prelude::{ParquetReader, ParquetWriter};

use crate::config::OutputFormat;
use super::write_atomic;

/// Write a DataFrame to `<stem>.<ext>` for the given format and return the path written.
pub(crate) fn write_table(df: &mut DataFrame, dir: &Path, stem: &str, format: OutputFormat) -> Result<PathBuf> {
    let path = dir.join(format!("{stem}.{}", format.extension()));
    let mut bytes = Vec::new();
    match format {
        OutputFormat::Csv => {
            CsvWriter::new(&mut bytes)
                .finish(df)
                .with_context(|| format!("[io::table] Failed to write CSV {}", path.display()))?;
        }
        #[cfg(feature = "parquet")]
        OutputFormat::Parquet => {
            ParquetWriter::new(&mut bytes)
                .finish(df)
                .with_context(|| format!("[io::table] Failed to write Parquet {}", path.display()))?;
        }
        #[cfg(not(feature = "parquet"))]
        OutputFormat::Parquet => bail!("[io::table] Parquet output requires the `parquet` feature"),
    }
    write_atomic(&path, &bytes)?;
    Ok(path)
}

/// Read a table written by `write_table`, choosing the reader by file extension.
/// `string_columns` are forced to strings when reading CSV so codes keep their text form.
pub(crate) fn read_table(path: &Path, string_columns: &[&str]) -> Result<DataFrame> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "csv" => {
            let bytes = std::fs::read(path)
                .with_context(|| format!("[io::table] Failed to open CSV file: {}", path.display()))?;
            let schema = Arc::new(Schema::from_iter(
                string_columns.iter().map(|name| Field::new((*name).into(), DataType::String)),
            ));
            let options = CsvReadOptions::default()
                .with_has_header(true)
                .with_schema_overwrite(Some(schema));
            CsvReader::new(Cursor::new(bytes))
                .with_options(options)
                .finish()
                .with_context(|| format!("[io::table] Failed to read CSV from {}", path.display()))
        }
        #[cfg(feature = "parquet")]
        "parquet" => {
            let file = File::open(path)
                .with_context(|| format!("[io::table] Failed to open Parquet file: {}", path.display()))?;
            ParquetReader::new(file)
                .finish()
                .with_context(|| format!("[io::table] Failed to read Parquet from {}", path.display()))
        }
        other => bail!("[io::table] Unsupported table extension {other:?} for {}", path.display()),
    }
}
