//! Records passed between the converter, the indexer and the repository.
//!
//! Identifiers are pure functions of filesystem paths, so the same folder or
//! file keeps the same id across every re-index. That is what lets counters
//! outlive generation swaps.

mod counters;

pub use crate::counters::{DownloadCounters, FileCounter};
use std::path::{Path, PathBuf};
use time::UtcDateTime;

/// Stable identifier of a path: the lowercase BLAKE3 hex digest of its bytes.
///
/// ```
/// use fetchtrack_model::stable_id;
/// use std::path::Path;
///
/// assert_eq!(stable_id(Path::new("/srv/share/alpha")), stable_id(Path::new("/srv/share/alpha")));
/// assert_ne!(stable_id(Path::new("/srv/share/alpha")), stable_id(Path::new("/srv/share/beta")));
/// ```
pub fn stable_id(path: &Path) -> String {
    blake3::hash(path.as_os_str().as_encoded_bytes()).to_hex().to_string()
}

/// A shareable folder, converted into something that can be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub id: String,
    pub title: String,
    /// Free text accompanying the folder, if it has any.
    pub description: Option<String>,
    pub enabled: bool,
    /// Absolute path of the folder on disk.
    pub source_path: PathBuf,
    /// Rendered HTML page; opaque to everything but the web layer.
    pub page_content: String,
    /// BLAKE3 hex digest of `page_content`.
    pub page_hash: String,
    pub files: Vec<File>,
    pub created_at: UtcDateTime,
}
impl Download {
    pub fn new(source_path: impl Into<PathBuf>, title: impl Into<String>, page_content: String, files: Vec<File>) -> Self {
        let source_path = source_path.into();
        Self {
            id: stable_id(&source_path),
            title: title.into(),
            description: None,
            enabled: true,
            page_hash: blake3::hash(page_content.as_bytes()).to_hex().to_string(),
            page_content,
            source_path,
            files,
            created_at: UtcDateTime::now(),
        }
    }
}

/// A single downloadable file inside a [`Download`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// Derived from the file's own full path, never from its download.
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub source_path: PathBuf,
    /// Public-facing path, e.g. `/share/alpha/a1.bin`.
    pub url: String,
    pub size: u64,
    pub mime_type: String,
}
impl File {
    pub fn new(source_path: impl Into<PathBuf>, url: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        let source_path = source_path.into();
        let name = source_path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
        Self {
            id: stable_id(&source_path),
            name,
            description: None,
            source_path,
            url: url.into(),
            size,
            mime_type: mime_type.into(),
        }
    }
}

/// Summary of one download in the active generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareInfo {
    pub id: String,
    pub source_path: PathBuf,
    pub file_count: usize,
}
