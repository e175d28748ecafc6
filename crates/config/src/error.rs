//! Configuration Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// An explicitly requested configuration file does not exist.
    #[display("configuration file not found: {}", _0.display())]
    Missing(#[error(not(source))] PathBuf),
    /// The file or environment could not be parsed into settings.
    #[display("failed to load configuration")]
    Load,
    /// Settings parsed, but a value is unusable.
    #[display("invalid setting `{_0}`")]
    Invalid(#[error(not(source))] &'static str),
}
