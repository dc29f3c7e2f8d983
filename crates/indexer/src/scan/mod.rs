//! Work directory scanning.

pub mod error;
mod pool;

pub use self::pool::parallel_map;
use crate::scan::error::{ErrorKind, Result};
use exn::ResultExt;
use fetchtrack_convert::ConverterHandle;
use fetchtrack_model::Download;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Most candidate folders considered per scan; the rest are ignored.
pub const MAX_DIRS: usize = 100;

/// Immediate subdirectories of `root`, sorted by name and capped at
/// [`MAX_DIRS`].
pub async fn candidates(root: &Path) -> Result<Vec<PathBuf>> {
    let unreadable = || ErrorKind::ReadDir(root.display().to_string());
    let mut entries = tokio::fs::read_dir(root).await.or_raise(unreadable)?;
    let mut folders = Vec::new();
    while let Some(entry) = entries.next_entry().await.or_raise(unreadable)? {
        match entry.file_type().await {
            Ok(file_type) if file_type.is_dir() => folders.push(entry.path()),
            Ok(_) => {},
            Err(err) => warn!(path = %entry.path().display(), error = %err, "could not read entry type"),
        }
    }
    folders.sort();
    if folders.len() > MAX_DIRS {
        debug!(found = folders.len(), kept = MAX_DIRS, "too many folders; ignoring the rest");
        folders.truncate(MAX_DIRS);
    }
    Ok(folders)
}

/// Convert every candidate folder below `root` into a [`Download`].
///
/// Folders the converter rejects are logged and left out. A cancelled scan
/// fails with [`ErrorKind::Cancelled`] rather than returning a partial list.
#[instrument(skip_all, fields(root = %root.display(), workers = workers))]
pub async fn scan(
    root: &Path,
    workers: usize,
    converter: ConverterHandle,
    cancel: &CancellationToken,
) -> Result<Vec<Download>> {
    let folders = candidates(root).await?;
    let found = folders.len();
    let downloads = parallel_map(folders, workers, cancel, move |folder: PathBuf| {
        match converter.convert(&folder) {
            Ok(download) => Some(download),
            Err(err) => {
                warn!(folder = %folder.display(), error = %err, "skipping folder");
                None
            },
        }
    })
    .await;
    if cancel.is_cancelled() {
        exn::bail!(ErrorKind::Cancelled);
    }
    info!(found, converted = downloads.len(), "scanned work directory");
    Ok(downloads)
}
