//! Periodic backup of spooled record files.
//!
//! Producers hand finished files to a [`Backuper`]; a [`Scheduler`] (or a
//! direct call to [`Backuper::backup_now`]) moves them from a source
//! [`StorageBackend`](spool_storage::StorageBackend) to a target one, either
//! file by file ([`Strategy::Copy`]) or merged into compressed day-bucketed
//! archives of length-delimited frames ([`Strategy::Aggregate`]).
//!
//! Nothing is dropped on failure: an item leaves the pending set only once it
//! has reached the target.

mod aggregate;
mod backuper;
pub mod config;
mod copy;
pub mod error;
pub mod frame;
pub mod queue;
mod scheduler;

pub use crate::aggregate::{archive_path, day_group_len};
pub use crate::backuper::{Backuper, RunSummary};
pub use crate::config::{BackupConfig, Strategy};
pub use crate::queue::{PendingItem, WorkQueue};
pub use crate::scheduler::Scheduler;
