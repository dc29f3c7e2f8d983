//! Folder → download conversion.
//!
//! The indexer only knows about the [`FolderConverter`] trait; everything
//! about how a folder on disk becomes a [`Download`] (which files count, how
//! urls look, what the page says) lives behind it. [`DirectoryConverter`] is
//! the local-filesystem implementation.

mod description;
mod directory;
pub mod error;
mod page;

pub use crate::description::DESCRIPTION_FILE;
pub use crate::directory::{DEFAULT_SKIP_FILES, DirectoryConverter, MAX_FILES};
use crate::error::Result;
use fetchtrack_model::Download;
use std::path::Path;
use std::sync::Arc;

/// Converts one candidate folder into a [`Download`].
///
/// Conversion is synchronous filesystem work; callers running on an async
/// runtime are expected to move it onto a blocking thread. Implementations
/// must fail for a folder with zero eligible files.
pub trait FolderConverter: Send + Sync {
    fn convert(&self, folder: &Path) -> Result<Download>;
}

pub type ConverterHandle = Arc<dyn FolderConverter>;
