//! Configuration for the `spool` binary.
//!
//! Settings come from one file (TOML, YAML or JSON, picked by extension)
//! layered under `SPOOL_`-prefixed environment variables, and are turned into
//! the typed configuration of the other crates here.

pub mod error;
mod settings;

pub use crate::settings::{BackupSection, ENV_PREFIX, S3Section, Settings, ShardsSection, default_path};
