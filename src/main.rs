mod cli;
mod commands;
mod error;

use crate::cli::{Cli, Command};
use clap::Parser;
use exn::ResultExt;
use spool_config::Settings;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> error::Result<()> {
    let settings = Settings::load(cli.config.as_deref()).or_raise(|| error::ErrorKind::Config)?;
    match cli.command {
        Command::Backup { files, watch } => commands::backup(&settings, files, watch).await,
        Command::FindShards { pattern, search } => commands::find_shards(&settings, &pattern, &search).await,
        Command::FindLatest { pattern, search } => commands::find_latest(&settings, &pattern, &search).await,
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}
