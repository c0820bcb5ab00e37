use anyhow::Result;
use eden::{PipelineConfig, QaChecker, StatsTable};

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::QaArgs) -> Result<()> {
    let config = PipelineConfig::load(&args.config)?;
    let stats = StatsTable::read(&args.stats)?;
    log::info!("[qa] {} records from {}", stats.len(), args.stats.display());

    let report = QaChecker::new(&config.qa).check(&stats);
    if let Some(out_dir) = &args.out {
        let path = report.write(out_dir, args.format.into())?;
        log::info!("[qa] wrote {}", path.display());
    }
    print!("{report}");
    Ok(())
}
