//! CLI Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not open store")]
    Store,
    #[display("could not set up folder conversion")]
    Converter,
    #[display("could not read the active generation")]
    Repository,
    #[display("index failed")]
    Index,
    #[display("dump failed")]
    Dump,
    #[display("lookup failed")]
    Lookup,
    #[display("could not install signal handlers")]
    Signal,
}
