use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("could not open {_0} storage")]
    Storage(#[error(not(source))] &'static str),
    #[display("backup failed")]
    Backup,
    #[display("search failed")]
    Search,
    #[display("invalid argument: {_0}")]
    Argument(#[error(not(source))] String),
}
