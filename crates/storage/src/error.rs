//! Storage Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// File does not exist
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied (permissions or credentials)
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// The backend could not be reached at all (S3 connections, etc.)
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Path contains invalid characters or escapes root
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Location string could not be parsed into a backend
    #[display("invalid location: {_0}")]
    InvalidLocation(#[error(not(source))] String),
    /// Backend type was not compiled into this build
    #[display("unsupported backend: {_0}")]
    Unsupported(#[error(not(source))] String),
    /// Backend-specific error
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::BackendError(_))
    }

    /// Returns `true` if the failure means the backend itself is unreachable,
    /// as opposed to a problem with one particular object.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_retryable() {
        let err = ErrorKind::Network("connection refused".to_string());
        assert!(err.is_connection());
        assert!(err.is_retryable());
    }

    #[test]
    fn missing_file_is_not_a_connection_error() {
        let err = ErrorKind::NotFound(PathBuf::from("a/b.pb"));
        assert!(!err.is_connection());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "file not found: a/b.pb");
    }

    #[test]
    fn io_error_converts() {
        let err: ErrorKind = IoError::other("disk on fire").into();
        assert!(matches!(err, ErrorKind::Io(_)));
        assert!(!err.is_connection());
    }
}
