use anyhow::Result;
use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;
use quarry::cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();

    Builder::new()
        .filter_level(match cli.verbose {
            0 => LevelFilter::Error,
            1 => LevelFilter::Warn,
            2 => LevelFilter::Info,
            3 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        })
        .init();

    quarry::cli::run(cli)
}
