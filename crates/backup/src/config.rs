use crate::error::{ErrorKind, Result};
use spool_compress::Compression;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default number of source files merged into one archive.
pub const DEFAULT_MAX_GROUP_SIZE: usize = 6;
/// Largest frame payload accepted from a source, in bytes.
pub const DEFAULT_MAX_FRAME_SIZE: u64 = 10_000_000;

/// How pending items reach the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Copy every file individually, bytes untouched.
    Copy,
    /// Merge the frames of same-day files into compressed archives.
    #[default]
    Aggregate,
}

impl FromStr for Strategy {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "copy" => Ok(Strategy::Copy),
            "aggregate" => Ok(Strategy::Aggregate),
            _ => exn::bail!(ErrorKind::Config(format!("unknown strategy `{s}`"))),
        }
    }
}

/// Everything a [`Backuper`](crate::Backuper) needs to know besides its
/// two backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub strategy: Strategy,
    /// Directory inside the target backend that receives copies/archives.
    /// `None` is the backend root.
    pub target_root: Option<PathBuf>,
    /// Leading source path components dropped before joining onto
    /// `target_root` (copy strategy only). Paths outside the prefix are used
    /// unchanged.
    pub strip_prefix: Option<PathBuf>,
    pub delete_after_backup: bool,
    /// When `false`, an existing destination fails the item with
    /// [`ErrorKind::Exists`] instead of being replaced.
    pub overwrite: bool,
    /// Time between scheduled runs.
    pub interval: Duration,
    /// Budget for one scheduled run.
    pub run_timeout: Duration,
    /// Budget for one item (copy) or one group (aggregate).
    pub item_timeout: Duration,
    pub max_group_size: usize,
    pub archive_compression: Compression,
    pub max_frame_size: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            target_root: None,
            strip_prefix: None,
            delete_after_backup: false,
            overwrite: true,
            interval: Duration::from_secs(300),
            run_timeout: Duration::from_secs(600),
            item_timeout: Duration::from_secs(60),
            max_group_size: DEFAULT_MAX_GROUP_SIZE,
            archive_compression: Compression::Gzip,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl BackupConfig {
    /// Reject values that would make a run spin or never make progress.
    pub fn validate(&self) -> Result<()> {
        if self.max_group_size == 0 {
            exn::bail!(ErrorKind::Config("max_group_size must be at least 1".to_string()));
        }
        if self.max_frame_size == 0 {
            exn::bail!(ErrorKind::Config("max_frame_size must be at least 1".to_string()));
        }
        for (name, value) in [
            ("interval", self.interval),
            ("run_timeout", self.run_timeout),
            ("item_timeout", self.item_timeout),
        ] {
            if value.is_zero() {
                exn::bail!(ErrorKind::Config(format!("{name} must not be zero")));
            }
        }
        Ok(())
    }
}
