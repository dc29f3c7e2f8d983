use crate::error::{ErrorKind, Result};
use crate::scan::{self, error::ErrorKind as ScanErrorKind};
use crate::single_flight::SingleFlight;
use exn::ResultExt;
use fetchtrack_convert::ConverterHandle;
use fetchtrack_model::ShareInfo;
use fetchtrack_repo::Repository;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub const DEFAULT_WORKERS: usize = 4;

/// Drives index cycles and counter dumps for one work directory.
pub struct Indexer {
    root: PathBuf,
    workers: usize,
    scan_timeout: Option<Duration>,
    converter: ConverterHandle,
    repository: Repository,
    flight: SingleFlight,
}

impl Indexer {
    pub fn new(root: impl Into<PathBuf>, converter: ConverterHandle, repository: Repository) -> Self {
        Self {
            root: root.into(),
            workers: DEFAULT_WORKERS,
            scan_timeout: None,
            converter,
            repository,
            flight: SingleFlight::default(),
        }
    }

    /// Number of folders converted concurrently (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Cancel a scan that runs for longer than `timeout`.
    pub fn with_scan_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.scan_timeout = timeout.into();
        self
    }

    pub fn repository(&self) -> &Repository {
        &self.repository
    }

    pub fn is_running(&self) -> bool {
        self.flight.is_running()
    }

    // =========================================================================
    // Index
    // =========================================================================

    /// Run one index cycle: scan, publish, prune counters, summarise.
    ///
    /// Fails immediately with [`ErrorKind::AlreadyRunning`] while another
    /// index or dump is in progress. A scan that finds nothing returns
    /// [`ErrorKind::NoDownloads`] without touching the store. Counter pruning
    /// is best-effort; its failure is logged and retried next cycle.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub async fn index(&self, cancel: &CancellationToken) -> Result<Vec<ShareInfo>> {
        let Some(_permit) = self.flight.try_acquire() else {
            exn::bail!(ErrorKind::AlreadyRunning);
        };
        info!("starting index");

        let scan_cancel = cancel.child_token();
        let mut scanning =
            std::pin::pin!(scan::scan(&self.root, self.workers, self.converter.clone(), &scan_cancel));
        let scanned = match self.scan_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut scanning).await {
                Ok(scanned) => scanned,
                Err(_) => {
                    warn!(timeout = ?limit, "scan timed out; cancelling");
                    scan_cancel.cancel();
                    scanning.await
                },
            },
            None => scanning.await,
        };
        let batch = scanned.map_err(|err| {
            let kind = match &*err {
                ScanErrorKind::Cancelled => ErrorKind::Cancelled,
                _ => ErrorKind::Scan,
            };
            err.raise(kind)
        })?;
        if batch.is_empty() {
            warn!("no downloads found; leaving store untouched");
            exn::bail!(ErrorKind::NoDownloads);
        }

        self.repository.publish(&batch).await.or_raise(|| ErrorKind::Publish)?;
        if let Err(err) = self.repository.prune_counters(&batch).await {
            warn!(error = %err, "could not prune counters; retrying next cycle");
        }
        let infos = self.repository.info().await.or_raise(|| ErrorKind::Info)?;
        info!(downloads = infos.len(), "index complete");
        Ok(infos)
    }

    // =========================================================================
    // Dump
    // =========================================================================

    /// Stream every live download with its file counters into `sink` as a
    /// JSON array, one object per line.
    ///
    /// Shares the single-flight slot with [`index`](Self::index). Output
    /// already written when an error occurs is left in the sink.
    #[instrument(skip_all)]
    pub async fn dump<W>(&self, cancel: &CancellationToken, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let Some(_permit) = self.flight.try_acquire() else {
            exn::bail!(ErrorKind::AlreadyRunning);
        };
        let written = self.write_counters(cancel, sink).await?;
        info!(downloads = written, "dumped counters");
        Ok(())
    }

    /// Dump into a file, replacing it only once the dump has succeeded.
    ///
    /// The dump is written to a uniquely named temporary file next to `path`
    /// and persisted over it at the end, so concurrent dumps (from other
    /// processes too) never share a partial file. The temporary file is
    /// removed on every failure.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub async fn dump_to_path(&self, cancel: &CancellationToken, path: &Path) -> Result<()> {
        let Some(_permit) = self.flight.try_acquire() else {
            exn::bail!(ErrorKind::AlreadyRunning);
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let temp = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new().prefix(".fetchtrack-dump-").suffix(".tmp").tempfile_in(dir)
        })
        .await
        .or_raise(|| ErrorKind::Dump)?
        .or_raise(|| ErrorKind::Dump)?;
        let file = temp.as_file().try_clone().or_raise(|| ErrorKind::Dump)?;
        let mut writer = BufWriter::new(tokio::fs::File::from_std(file));
        let written = self.write_counters(cancel, &mut writer).await?;
        writer.into_inner().sync_all().await.or_raise(|| ErrorKind::Dump)?;

        let target = path.to_path_buf();
        tokio::task::spawn_blocking(move || temp.persist(target).map(drop).map_err(|err| err.error))
            .await
            .or_raise(|| ErrorKind::Dump)?
            .or_raise(|| ErrorKind::Dump)?;
        info!(downloads = written, "dumped counters");
        Ok(())
    }

    async fn write_counters<W>(&self, cancel: &CancellationToken, sink: &mut W) -> Result<usize>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        sink.write_all(b"[\n").await.or_raise(|| ErrorKind::Dump)?;
        let mut counters = std::pin::pin!(self.repository.counters_stream());
        let mut written = 0;
        while let Some(entry) = counters.next().await {
            if cancel.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            let entry = entry.or_raise(|| ErrorKind::Dump)?;
            let mut line = serde_json::to_vec(&entry).or_raise(|| ErrorKind::Dump)?;
            line.push(b'\n');
            if written > 0 {
                sink.write_all(b",").await.or_raise(|| ErrorKind::Dump)?;
            }
            sink.write_all(&line).await.or_raise(|| ErrorKind::Dump)?;
            written += 1;
        }
        sink.write_all(b"]").await.or_raise(|| ErrorKind::Dump)?;
        sink.flush().await.or_raise(|| ErrorKind::Dump)?;
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fetchtrack_convert::FolderConverter;
    use fetchtrack_convert::error::Result as ConvertResult;
    use fetchtrack_model::{Download, File, stable_id};
    use fetchtrack_store::backend::{FaultyStore, Operation};
    use fetchtrack_store::{MemoryStore, StoreHandle};
    use rstest::rstest;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// One file per folder, named after the folder.
    struct SingleFileConverter {
        delay: Duration,
        calls: AtomicUsize,
    }
    impl SingleFileConverter {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self { delay, calls: AtomicUsize::new(0) })
        }
    }
    impl FolderConverter for SingleFileConverter {
        fn convert(&self, folder: &Path) -> ConvertResult<Download> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            let name = folder.file_name().unwrap().to_string_lossy().into_owned();
            let file = File::new(folder.join("f.bin"), format!("/share/{name}/f.bin"), 1, "application/octet-stream");
            Ok(Download::new(folder, name.clone(), name, vec![file]))
        }
    }

    fn tree(names: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for name in names {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        dir
    }

    async fn indexer(root: &Path, store: StoreHandle, converter: ConverterHandle) -> Indexer {
        let repository = Repository::load(store).await.unwrap();
        Indexer::new(root, converter, repository).with_workers(2)
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_index_publishes_and_summarises() {
        let dir = tree(&["alpha", "beta"]);
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let indexer = indexer(dir.path(), store.clone(), SingleFileConverter::new(Duration::ZERO)).await;
        let infos = indexer.index(&CancellationToken::new()).await.unwrap();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|info| info.file_count == 1));
        assert_eq!(store.get("av").await.unwrap().as_deref(), Some("A"));
        assert!(!indexer.is_running());
    }

    #[tokio::test]
    async fn test_empty_root_leaves_store_untouched() {
        let dir = tree(&[]);
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let indexer = indexer(dir.path(), store.clone(), SingleFileConverter::new(Duration::ZERO)).await;
        let err = indexer.index(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NoDownloads));
        assert_eq!(store.get("av").await.unwrap(), None);
        assert!(!indexer.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_index_is_rejected() {
        let dir = tree(&["alpha", "beta"]);
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let converter = SingleFileConverter::new(Duration::from_millis(200));
        let indexer = Arc::new(indexer(dir.path(), store, converter.clone()).await);

        let first = tokio::spawn({
            let indexer = indexer.clone();
            async move { indexer.index(&CancellationToken::new()).await }
        });
        while !indexer.is_running() {
            tokio::task::yield_now().await;
        }
        let err = indexer.index(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyRunning));
        let mut sink = Vec::new();
        let err = indexer.dump(&CancellationToken::new(), &mut sink).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::AlreadyRunning));

        assert_eq!(first.await.unwrap().unwrap().len(), 2);
        assert_eq!(converter.calls.load(Ordering::SeqCst), 2);
        assert!(indexer.index(&CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_index_publishes_nothing() {
        let dir = tree(&["alpha"]);
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let indexer = indexer(dir.path(), store.clone(), SingleFileConverter::new(Duration::ZERO)).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = indexer.index(&cancel).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
        assert_eq!(store.get("av").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scan_timeout_cancels() {
        let dir = tree(&["a", "b", "c", "d"]);
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let converter = SingleFileConverter::new(Duration::from_millis(100));
        let indexer = indexer(dir.path(), store.clone(), converter)
            .await
            .with_workers(1)
            .with_scan_timeout(Duration::from_millis(50));
        let err = indexer.index(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
        assert_eq!(store.get("av").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_prune_failure_does_not_fail_index() {
        let dir = tree(&["alpha"]);
        let faulty = Arc::new(FaultyStore::new(Arc::new(MemoryStore::default())));
        faulty.fail(Operation::HScan);
        let indexer = indexer(dir.path(), faulty.clone(), SingleFileConverter::new(Duration::ZERO)).await;
        assert_eq!(indexer.index(&CancellationToken::new()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_reported() {
        let dir = tree(&["alpha"]);
        let faulty = Arc::new(FaultyStore::new(Arc::new(MemoryStore::default())));
        faulty.fail(Operation::Apply);
        let indexer = indexer(dir.path(), faulty.clone(), SingleFileConverter::new(Duration::ZERO)).await;
        let err = indexer.index(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Publish));
        assert!(!indexer.is_running());
    }

    #[tokio::test]
    async fn test_dump_format() {
        let dir = tree(&["alpha", "beta"]);
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let indexer = indexer(dir.path(), store, SingleFileConverter::new(Duration::ZERO)).await;

        let mut empty = Vec::new();
        indexer.dump(&CancellationToken::new(), &mut empty).await.unwrap();
        assert_eq!(empty, b"[\n]");

        indexer.index(&CancellationToken::new()).await.unwrap();
        let mut sink = Vec::new();
        indexer.dump(&CancellationToken::new(), &mut sink).await.unwrap();
        let text = String::from_utf8(sink).unwrap();
        assert!(text.starts_with("[\n{"));
        assert!(text.ends_with("}\n]"));
        assert_eq!(text.matches("\n,").count(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_dump_to_path_replaces_atomically() {
        let dir = tree(&["alpha"]);
        let out = tempfile::tempdir().unwrap();
        let path = out.path().join("counters.json");
        std::fs::write(&path, b"previous").unwrap();
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let indexer = indexer(dir.path(), store, SingleFileConverter::new(Duration::ZERO)).await;
        indexer.index(&CancellationToken::new()).await.unwrap();

        indexer.dump_to_path(&CancellationToken::new(), &path).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(parsed[0]["files"][0]["counter"], 0);
        assert_eq!(dir_entries(out.path()), vec!["counters.json"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dumps_to_one_path() {
        let names: Vec<String> = (0..60).map(|n| format!("d{n:02}")).collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        let dir = tree(&names);
        let out = tempfile::tempdir().unwrap();
        let path = out.path().join("counters.json");
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let converter = SingleFileConverter::new(Duration::ZERO);
        let first = indexer(dir.path(), store.clone(), converter.clone()).await;
        first.index(&CancellationToken::new()).await.unwrap();
        // A second indexer over the same store stands in for another process.
        let second = indexer(dir.path(), store, converter).await;

        for _ in 0..10 {
            let cancel = CancellationToken::new();
            let (a, b) = tokio::join!(first.dump_to_path(&cancel, &path), second.dump_to_path(&cancel, &path));
            a.unwrap();
            b.unwrap();
            let parsed: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
            assert_eq!(parsed.as_array().unwrap().len(), 60);
            assert_eq!(dir_entries(out.path()), vec!["counters.json"]);
        }
    }

    #[tokio::test]
    async fn test_failed_dump_keeps_previous_file() {
        let dir = tree(&["alpha"]);
        let out = tempfile::tempdir().unwrap();
        let path = out.path().join("counters.json");
        std::fs::write(&path, b"previous").unwrap();
        let faulty = Arc::new(FaultyStore::new(Arc::new(MemoryStore::default())));
        let indexer = indexer(dir.path(), faulty.clone(), SingleFileConverter::new(Duration::ZERO)).await;
        indexer.index(&CancellationToken::new()).await.unwrap();

        faulty.fail(Operation::HGetAll);
        let err = indexer.dump_to_path(&CancellationToken::new(), &path).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Dump));
        assert_eq!(std::fs::read(&path).unwrap(), b"previous");
        assert_eq!(dir_entries(out.path()), vec!["counters.json"]);
    }

    #[tokio::test]
    async fn test_failed_persist_removes_temporary_file() {
        let dir = tree(&["alpha"]);
        let out = tempfile::tempdir().unwrap();
        // A non-empty directory cannot be replaced by a file.
        let path = out.path().join("counters.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"").unwrap();
        let store: StoreHandle = Arc::new(MemoryStore::default());
        let indexer = indexer(dir.path(), store, SingleFileConverter::new(Duration::ZERO)).await;
        indexer.index(&CancellationToken::new()).await.unwrap();

        let err = indexer.dump_to_path(&CancellationToken::new(), &path).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Dump));
        assert_eq!(dir_entries(out.path()), vec!["counters.json"]);
        assert!(!indexer.is_running());
    }

    #[rstest]
    #[case::write(Operation::Apply)]
    #[case::swap(Operation::Set)]
    #[tokio::test]
    async fn test_counters_survive_failed_publish(#[case] failing: Operation) {
        let dir = tree(&["alpha", "beta"]);
        let inner: StoreHandle = Arc::new(MemoryStore::default());
        let faulty = Arc::new(FaultyStore::new(inner.clone()));
        let indexer = indexer(dir.path(), faulty.clone(), SingleFileConverter::new(Duration::ZERO)).await;
        indexer.index(&CancellationToken::new()).await.unwrap();
        let beta_file = stable_id(&dir.path().join("beta").join("f.bin"));
        indexer.repository().increment_file_counter(&beta_file).await.unwrap();
        std::fs::remove_dir(dir.path().join("beta")).unwrap();

        faulty.fail(failing);
        let err = indexer.index(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Publish));
        assert_eq!(inner.hget("fs", &beta_file).await.unwrap().as_deref(), Some("1"));
        assert_eq!(inner.get("av").await.unwrap().as_deref(), Some("A"));

        faulty.recover(failing);
        assert_eq!(indexer.index(&CancellationToken::new()).await.unwrap().len(), 1);
        assert_eq!(inner.hget("fs", &beta_file).await.unwrap(), None);
    }
}
