//! Indexer Error Types

use derive_more::{Display, Error};

/// An indexer error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for indexer operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Another index or dump is in progress; try again later.
    #[display("indexing process has already started")]
    AlreadyRunning,
    #[display("could not scan work directory")]
    Scan,
    /// The operation was cancelled before anything was published or written.
    #[display("cancelled")]
    Cancelled,
    /// Scan found nothing to publish; the store was left untouched.
    #[display("no downloads found")]
    NoDownloads,
    #[display("could not publish downloads")]
    Publish,
    #[display("could not read download info")]
    Info,
    #[display("could not dump counters")]
    Dump,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AlreadyRunning | Self::Publish | Self::Info | Self::Dump)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::AlreadyRunning, true)]
    #[case(ErrorKind::Publish, true)]
    #[case(ErrorKind::Dump, true)]
    #[case(ErrorKind::NoDownloads, false)]
    #[case(ErrorKind::Cancelled, false)]
    fn test_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }
}
