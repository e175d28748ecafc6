//! Discovery in date-bucketed storage.
//!
//! Producers elsewhere write their output under `<root>/YYYY/MM/DD/`. A
//! sharded output is a family of `N` files named
//! `<prefix>-<index:05>-of-<N:05><suffix>`, and is only usable once every
//! member exists. [`ShardedSetFinder::find`] walks back from a reference date
//! until it sees a complete family; [`ShardedSetFinder::find_latest`] looks
//! for the newest single object instead.

pub mod error;
mod finder;
mod pattern;

pub use crate::finder::{DEFAULT_LOOKBACK_DAYS, FinderSettings, ShardedSetFinder};
pub use crate::pattern::{MAX_SHARD_COUNT, ShardPattern, shard_paths};
