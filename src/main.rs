use std::fs::OpenOptions;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use interaction_tracker::{Config, Scenario};
use tracing_subscriber::EnvFilter;

/// Run a canned page session and print the interactions it harvested
#[derive(Debug, Parser)]
#[command(name = "ixn-trace", version, about)]
struct Cli {
    /// TOML file merged over the default tracker settings
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    #[arg(value_enum)]
    scenario: Scenario,
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into());
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(file)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_ref())?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::default(),
    };

    let run = cli.scenario.run(config)?;
    println!("{}", serde_json::to_string_pretty(&run.to_json()?)?);
    Ok(())
}
