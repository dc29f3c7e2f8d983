use serde::Serialize;

/// Download counters of every file in one download, as exported by a dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadCounters {
    pub id: String,
    /// Source path of the download folder.
    pub path: String,
    pub files: Vec<FileCounter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileCounter {
    pub id: String,
    pub name: String,
    /// Public url of the file.
    pub path: String,
    pub counter: i64,
}
impl FileCounter {
    /// Build a counter entry from a file url; the name is its last segment.
    pub fn from_url(id: impl Into<String>, url: impl Into<String>, counter: i64) -> Self {
        let path = url.into();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        Self { id: id.into(), name, path, counter }
    }
}
