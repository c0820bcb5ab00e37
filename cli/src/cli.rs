use std::path::PathBuf;

use eden::OutputFormat;

/// Ecoregion zonal statistics CLI (argument schema only)
#[derive(clap::Parser, Debug)]
#[command(name = "eden", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Build the region set: bounds table, canonical GeoJSON and area summary
    Regions(RegionsArgs),

    /// Run registry, aggregation, QA and feature assembly
    Zonal(ZonalArgs),

    /// Re-run QA over a persisted statistics table
    Qa(QaArgs),

    /// Assemble the feature table from persisted statistics and regions
    Features(FeaturesArgs),
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
pub enum Format {
    Csv,
    Parquet,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Csv => OutputFormat::Csv,
            Format::Parquet => OutputFormat::Parquet,
        }
    }
}

#[derive(clap::Args, Debug)]
pub struct RegionsArgs {
    /// Pipeline configuration (JSON)
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Output directory, defaults to the configured output dir
    #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
    pub out: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct ZonalArgs {
    /// Pipeline configuration (JSON)
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Output directory, defaults to the configured output dir
    #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
    pub out: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct QaArgs {
    /// Statistics table written by `zonal`
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub stats: PathBuf,

    /// Pipeline configuration (JSON) holding the QA thresholds
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub config: PathBuf,

    /// Also write the flags table into this directory
    #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
    pub out: Option<PathBuf>,

    /// Table format for --out
    #[arg(long, value_enum, default_value = "csv")]
    pub format: Format,
}

#[derive(clap::Args, Debug)]
pub struct FeaturesArgs {
    /// Statistics table written by `zonal`
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub stats: PathBuf,

    /// Canonical region GeoJSON written by `regions`; drives row presence
    #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
    pub regions: PathBuf,

    /// Output directory
    #[arg(short, long, value_hint = clap::ValueHint::DirPath)]
    pub out: PathBuf,

    /// Merge into an existing feature table instead of replacing it
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub merge: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "csv")]
    pub format: Format,
}
