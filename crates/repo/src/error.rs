//! Repository Error Types

use crate::Generation;
use derive_more::{Display, Error};

/// A repository error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for repository operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// A store operation failed; the cause is attached.
    #[display("store operation failed")]
    Store,
    #[display("could not clear generation {_0}")]
    Clear(#[error(not(source))] Generation),
    #[display("could not write generation {_0}")]
    Write(#[error(not(source))] Generation),
    #[display("could not activate generation {_0}")]
    Swap(#[error(not(source))] Generation),
    #[display("invalid generation: {_0}")]
    InvalidGeneration(#[error(not(source))] String),
    #[display("page not found: {_0}")]
    PageNotFound(#[error(not(source))] String),
    #[display("file not found: {_0}")]
    FileNotFound(#[error(not(source))] String),
    /// The active generation holds no downloads (or there is none yet).
    #[display("no downloads found")]
    NoDownloads,
}
