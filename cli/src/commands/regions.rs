use anyhow::Result;
use eden::{Pipeline, PipelineConfig};

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::RegionsArgs) -> Result<()> {
    let config = PipelineConfig::load(&args.config)?;
    let out_dir = args.out.clone().unwrap_or_else(|| config.output.dir.clone());
    let format = config.output.format;
    let pipeline = Pipeline::new(config)?;

    log::info!("[regions] building region set from {}", args.config.display());
    let regions = pipeline.prepare_regions()?;
    for path in regions.write(&out_dir, format)? {
        log::info!("[regions] wrote {}", path.display());
    }

    println!("[regions] {} regions -> {}", regions.len(), out_dir.display());
    for dropped in regions.dropped() {
        println!("[regions] dropped {} ({} feature #{}): {}", dropped.uid, dropped.source, dropped.index, dropped.reason);
    }
    Ok(())
}
