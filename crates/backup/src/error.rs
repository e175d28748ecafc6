//! Backup Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Storage and compression failures are raised into one of
//! these kinds so the caller can tell a dead backend from one bad file.

use derive_more::{Display, Error};
use spool_storage::error::Error as StorageError;
use std::path::PathBuf;

/// A backup error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for backup operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// ### Run-level
/// - [`ErrorKind::Connection`]: a backend is unreachable; the run stopped.
/// - [`ErrorKind::Timeout`]: the run budget ran out; the rest waits.
/// - [`ErrorKind::Incomplete`]: some items failed and stay pending.
///
/// ### Item-level
/// - [`ErrorKind::Transfer`], [`ErrorKind::Source`], [`ErrorKind::Destination`]
/// - [`ErrorKind::Exists`]: overwriting was disabled and the destination is taken.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A backend could not be reached at all.
    #[display("backend unreachable")]
    Connection,
    /// Copying one item failed; the item stays pending.
    #[display("transfer failed: {}", _0.display())]
    Transfer(#[error(not(source))] PathBuf),
    /// The run finished but left failed items behind for the next one.
    #[display("{failed} of {total} items failed and remain pending")]
    Incomplete { failed: usize, total: usize },
    /// Writing (or committing) an archive failed.
    #[display("destination write failed: {}", _0.display())]
    Destination(#[error(not(source))] PathBuf),
    /// A source could not be read for a reason other than truncation.
    #[display("source read failed: {}", _0.display())]
    Source(#[error(not(source))] PathBuf),
    /// Destination already present and overwriting is disabled.
    #[display("destination already exists: {}", _0.display())]
    Exists(#[error(not(source))] PathBuf),
    /// The run budget or an item timeout expired.
    #[display("timed out")]
    Timeout,
    /// Configuration values that can't work.
    #[display("invalid configuration: {_0}")]
    Config(#[error(not(source))] String),
    /// A background task panicked or was cancelled.
    #[display("background task failed")]
    Task,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Exists(_) | Self::Config(_))
    }
}

/// Raise a storage failure as `kind`, unless it means the backend is gone, in
/// which case it becomes [`ErrorKind::Connection`].
#[track_caller]
pub(crate) fn storage_failure(err: StorageError, kind: ErrorKind) -> Error {
    match err.is_connection() {
        true => err.raise(ErrorKind::Connection),
        false => err.raise(kind),
    }
}
