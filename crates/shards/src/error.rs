//! Shard Discovery Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A shard pattern must have exactly three capture groups: prefix, shard
    /// count and suffix.
    #[display("shard pattern needs exactly 3 capture groups, found {_0}")]
    InvalidPattern(#[error(not(source))] usize),
    /// The pattern is not a valid regular expression.
    #[display("invalid regular expression: {_0}")]
    InvalidRegex(#[error(not(source))] String),
    /// Nothing matched within the lookback window.
    #[display("nothing found in the last {_0} days")]
    NotFound(#[error(not(source))] u32),
    /// Listing the backend failed.
    #[display("storage listing failed")]
    Storage,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Storage)
    }
}
