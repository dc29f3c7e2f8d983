use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The root directory could not be listed.
    #[display("could not read directory: {_0}")]
    ReadDir(#[error(not(source))] String),
    #[display("scan cancelled")]
    Cancelled,
}
