//! Config Error Types

use derive_more::{Display, Error};

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Sources could not be read or merged into a [`Config`](crate::Config).
    #[display("could not load configuration")]
    Load,
    /// A field holds a value that cannot work; the field name is attached.
    #[display("invalid configuration value: {_0}")]
    Invalid(#[error(not(source))] &'static str),
}
