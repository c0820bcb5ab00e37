mod cli;
mod commands;

use anyhow::Result;
use flexi_logger::{Logger, LoggerHandle};

use cli::{Cli, Commands};
use commands::{features, qa, regions, zonal};

/// `RUST_LOG` wins over the verbosity flag.
fn setup_logging(verbose: u8) -> Result<LoggerHandle> {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    Ok(Logger::try_with_env_or_str(level)?.log_to_stderr().start()?)
}

pub fn run() -> Result<()> {
    use clap::Parser;

    let cli = Cli::parse();
    let _logger = setup_logging(cli.verbose)?;
    match &cli.command {
        Commands::Regions(args) => regions::run(&cli, args),
        Commands::Zonal(args) => zonal::run(&cli, args),
        Commands::Qa(args) => qa::run(&cli, args),
        Commands::Features(args) => features::run(&cli, args),
    }
}

fn main() -> Result<()> { run() }
