use anyhow::Result;
use eden::{FeatureTable, RegionSet, StatsTable, assemble};

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::FeaturesArgs) -> Result<()> {
    let stats = StatsTable::read(&args.stats)?;
    let regions = RegionSet::read_geojson(&args.regions)?;

    let mut table = assemble(&stats, &regions.uids());
    if let Some(previous) = &args.merge {
        table = FeatureTable::read(previous)?.merge(table);
    }
    let path = table.write(&args.out, args.format.into())?;

    println!("[features] {} rows x {} columns -> {}", table.height(), table.column_names().len(), path.display());
    Ok(())
}
