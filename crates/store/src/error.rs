//! Store Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A store error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The underlying database (connection, query, transaction) failed.
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// Operation against a key holding the wrong kind of value (e.g. a hash
    /// operation against a plain string key).
    #[display("wrong type of value held at key: {_0}")]
    WrongType(#[error(not(source))] String),
    /// Stored data could not be interpreted (e.g. a non-integer counter).
    #[display("invalid store data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
    /// Key pattern could not be compiled.
    #[display("invalid key pattern: {_0}")]
    InvalidPattern(#[error(not(source))] String),
    /// Backend-specific error
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
}
