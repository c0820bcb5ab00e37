use anyhow::{Result, bail};
use eden::{Pipeline, PipelineConfig};

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::ZonalArgs) -> Result<()> {
    let config = PipelineConfig::load(&args.config)?;
    let signature = config.signature()?;
    let out_dir = args.out.clone().unwrap_or_else(|| config.output.dir.clone());
    let format = config.output.format;
    let pipeline = Pipeline::new(config)?;

    log::info!("[zonal] run {signature}");
    let (regions, output) = pipeline.execute()?;
    regions.write(&out_dir, format)?;
    output.write(&out_dir, format, &signature)?;

    print!("{}", output.report);
    print!("{}", output.qa);
    if !output.report.is_success() {
        bail!("{} region x raster units failed; see the report above", output.report.failures.len());
    }
    Ok(())
}
