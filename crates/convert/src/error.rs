//! Converter Error Types

use derive_more::{Display, Error};

/// A conversion error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for conversion operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Folder path attempts to escape the work directory.
    #[display("invalid folder path: {_0}")]
    InvalidPath(#[error(not(source))] String),
    /// Folder contains no eligible files; it is not a download.
    #[display("folder has no files")]
    NoFiles,
    #[display("could not read folder")]
    Io,
    #[display("issue with page template")]
    Template,
    /// The folder's description file has unreadable front matter.
    #[display("invalid folder description")]
    Description,
}
