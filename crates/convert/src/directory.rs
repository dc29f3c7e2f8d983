use crate::FolderConverter;
use crate::description::{DESCRIPTION_FILE, Description};
use crate::error::{ErrorKind, Result};
use crate::page::PageRenderer;
use exn::{OptionExt, ResultExt};
use fetchtrack_model::{Download, File, stable_id};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Most files a single download will list; the rest are ignored.
pub const MAX_FILES: usize = 100;
/// Folder-level metadata files that are never offered for download.
pub const DEFAULT_SKIP_FILES: [&str; 3] = ["index.html", DESCRIPTION_FILE, TEMPLATE_FILE];
const TEMPLATE_FILE: &str = "template.html";

/// Converts folders below a work directory on the local filesystem.
///
/// Every regular file directly inside a folder (no recursion) becomes a
/// [`File`], sorted by name, unless its name is on the skip list. Public urls
/// are `/{work dir name}/{path relative to the work dir}`. Title, enabled
/// flag and descriptions come from the folder's `description.md` when present.
pub struct DirectoryConverter {
    work_dir: PathBuf,
    share: String,
    skip_files: HashSet<String>,
    pages: PageRenderer,
}
impl DirectoryConverter {
    /// `url` is the public base url rendered into download pages.
    pub fn new(work_dir: impl Into<PathBuf>, url: impl Into<String>) -> Result<Self> {
        let work_dir = work_dir.into();
        let share = work_dir
            .file_name()
            .ok_or_raise(|| ErrorKind::InvalidPath(work_dir.display().to_string()))?
            .to_string_lossy()
            .into_owned();
        Ok(Self {
            work_dir,
            share,
            skip_files: DEFAULT_SKIP_FILES.iter().map(|name| name.to_string()).collect(),
            pages: PageRenderer::new(url)?,
        })
    }

    /// Skip these file names in addition to [`DEFAULT_SKIP_FILES`].
    pub fn with_skip_files(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.skip_files.extend(names.into_iter().map(Into::into));
        self
    }

    fn validate(&self, folder: &Path) -> Result<PathBuf> {
        let invalid = || ErrorKind::InvalidPath(folder.display().to_string());
        if folder.components().any(|c| matches!(c, Component::ParentDir)) {
            exn::bail!(invalid());
        }
        let relative = folder.strip_prefix(&self.work_dir).or_raise(invalid)?;
        Ok(relative.to_path_buf())
    }

    fn url(&self, relative: &Path, name: &str) -> String {
        let mut url = format!("/{}", self.share);
        for component in relative.components() {
            if let Component::Normal(segment) = component {
                url.push('/');
                url.push_str(&segment.to_string_lossy());
            }
        }
        url.push('/');
        url.push_str(name);
        url
    }

    fn files(&self, folder: &Path, relative: &Path) -> Result<Vec<File>> {
        let mut entries = std::fs::read_dir(folder)
            .or_raise(|| ErrorKind::Io)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .or_raise(|| ErrorKind::Io)?;
        entries.sort_by_key(|entry| entry.file_name());

        let mut files = Vec::new();
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            let path = entry.path();
            if self.skip_files.contains(&name) {
                debug!(path = %path.display(), "skipping metadata file");
                continue;
            }
            // Follows symlinks, so a link to a regular file is offered too.
            let metadata = match std::fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "could not stat file");
                    continue;
                },
            };
            if !metadata.is_file() {
                continue;
            }
            let mime_type = mime_guess::from_path(&path).first_or_octet_stream().to_string();
            files.push(File::new(&path, self.url(relative, &name), metadata.len(), mime_type));
            if files.len() >= MAX_FILES {
                break;
            }
        }
        Ok(files)
    }

    fn template_source(folder: &Path) -> Result<Option<String>> {
        match std::fs::read_to_string(folder.join(TEMPLATE_FILE)) {
            Ok(source) => Ok(Some(source)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).or_raise(|| ErrorKind::Io),
        }
    }
}

impl FolderConverter for DirectoryConverter {
    #[instrument(skip_all, fields(folder = %folder.display()))]
    fn convert(&self, folder: &Path) -> Result<Download> {
        let relative = self.validate(folder)?;
        let mut files = self.files(folder, &relative)?;
        if files.is_empty() {
            exn::bail!(ErrorKind::NoFiles);
        }
        let description = Description::read(folder)?.unwrap_or_default();
        for file in &mut files {
            file.description = description.front.files.get(&file.name).cloned();
        }
        let title = description
            .front
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| folder.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default());
        let source = Self::template_source(folder)?;
        let page = self.pages.render(source, &stable_id(folder), &title, description.body.as_deref(), &files)?;

        let mut download = Download::new(folder, title, page, files);
        download.enabled = description.front.enabled;
        download.description = description.body;
        Ok(download)
    }
}
