use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "spool", version, about = "Back up spooled record files and find sharded outputs")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON); defaults to the platform
    /// config directory
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// More logging; repeat for trace output. `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Back up the given files (relative to the source), or everything under
    /// the source when none are given
    Backup {
        #[arg(value_name = "FILE")]
        files: Vec<PathBuf>,
        /// Keep running on the configured interval until interrupted. Without
        /// FILE arguments the source is walked again on every interval and
        /// new files are queued
        #[arg(long)]
        watch: bool,
    },
    /// Find the newest complete sharded file set
    FindShards {
        /// Regular expression with three groups: prefix, shard count, suffix
        pattern: String,
        #[command(flatten)]
        search: SearchArgs,
    },
    /// Find the newest object matching a pattern
    FindLatest {
        pattern: String,
        #[command(flatten)]
        search: SearchArgs,
    },
}

#[derive(Debug, clap::Args)]
pub struct SearchArgs {
    /// Day to start searching from, as YYYY-MM-DD (default: today, UTC)
    #[arg(long)]
    pub date: Option<String>,
    /// Storage location to search, overriding `shards.location`
    #[arg(long)]
    pub location: Option<String>,
    /// Days to search back, overriding `shards.lookback_days`
    #[arg(long)]
    pub lookback_days: Option<u32>,
}
