use crate::error::{ErrorKind, Result};
use crate::generation::{ActiveGeneration, Generation};
use crate::keys;
use async_stream::stream;
use exn::ResultExt;
use fetchtrack_model::{Download, DownloadCounters, FileCounter, ShareInfo};
use fetchtrack_store::error::Result as StoreResult;
use fetchtrack_store::{Batch, Pattern, StoreHandle};
use futures::Stream;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Reads and publishes download records over a [`KeyValueStore`](fetchtrack_store::KeyValueStore).
///
/// # Publication protocol
///
/// 1. Resolve the standby generation from the pointer key.
/// 2. Clear every generation-scoped key of the standby generation.
/// 3. Write the whole batch into the standby generation in one pipelined call.
/// 4. Flip the pointer with a single `SET`.
///
/// A failure in steps 2-3 returns before the pointer is touched, and a failed
/// step 4 leaves the pointer as it was. Either way readers keep resolving the
/// previous generation.
///
/// Readers resolve keys through the in-process [`ActiveGeneration`] holder,
/// which is updated only after a successful swap.
#[derive(Clone)]
pub struct Repository {
    store: StoreHandle,
    active: Arc<ActiveGeneration>,
}

impl Repository {
    /// Create a repository sharing an existing active-generation holder.
    pub fn new(store: StoreHandle, active: Arc<ActiveGeneration>) -> Self {
        Self { store, active }
    }

    /// Create a repository whose holder is primed from the store's pointer.
    pub async fn load(store: StoreHandle) -> Result<Self> {
        let repository = Self::new(store, Arc::new(ActiveGeneration::default()));
        repository.refresh().await?;
        Ok(repository)
    }

    /// Re-read the pointer key into the holder, for processes that did not
    /// publish themselves.
    pub async fn refresh(&self) -> Result<Option<Generation>> {
        let active = self.stored_generation().await?;
        match active {
            Some(generation) => self.active.set(generation),
            None => self.active.clear(),
        }
        Ok(active)
    }

    /// The generation readers currently resolve.
    pub fn active(&self) -> Option<Generation> {
        self.active.get()
    }

    async fn stored_generation(&self) -> Result<Option<Generation>> {
        let Some(value) = self.store.get(keys::ACTIVE).await.or_raise(|| ErrorKind::Store)? else {
            return Ok(None);
        };
        match value.parse() {
            Ok(generation) => Ok(Some(generation)),
            Err(_) => {
                warn!(value = %value, "ignoring unrecognised active generation pointer");
                Ok(None)
            },
        }
    }

    // =========================================================================
    // Publication
    // =========================================================================

    /// Publish a complete batch of downloads and make it the live generation.
    ///
    /// With no pointer stored yet, the first batch lands in generation A.
    /// Returns the generation that is now active.
    #[instrument(skip_all, fields(downloads = batch.len()))]
    pub async fn publish(&self, batch: &[Download]) -> Result<Generation> {
        let active = self.stored_generation().await?;
        let standby = active.map_or(Generation::A, Generation::other);
        info!(active = ?active, standby = %standby, "publishing new generation");

        let cleared = self.clear(standby).await.or_raise(|| ErrorKind::Clear(standby))?;
        debug!(generation = %standby, keys = cleared, "cleared standby generation");

        self.store.apply(Self::write_batch(standby, batch)).await.or_raise(|| ErrorKind::Write(standby))?;
        self.store.set(keys::ACTIVE, standby.as_str()).await.or_raise(|| ErrorKind::Swap(standby))?;
        self.active.set(standby);

        info!(generation = %standby, "activated generation");
        Ok(standby)
    }

    /// Delete every key of a generation, one cursor page at a time.
    async fn clear(&self, generation: Generation) -> StoreResult<u64> {
        let mut deleted = 0;
        for namespace in keys::GENERATION_SCOPED {
            let pattern = Pattern::new(keys::scoped_children(namespace, generation))?;
            let mut cursor: Option<String> = None;
            loop {
                let page = self.store.scan(cursor.as_deref(), &pattern, keys::SCAN_COUNT).await?;
                if !page.items.is_empty() {
                    deleted += self.store.delete(&page.items).await?;
                }
                match page.next {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
            deleted += self.store.delete(&[keys::scoped(namespace, generation)]).await?;
        }
        Ok(deleted)
    }

    fn write_batch(generation: Generation, downloads: &[Download]) -> Batch {
        let capacity = downloads.iter().map(|download| 2 + 2 * download.files.len()).sum();
        let mut batch = Batch::with_capacity(capacity);
        let download_map = keys::downloads(generation);
        let page_map = keys::pages(generation);
        let file_map = keys::files(generation);
        for download in downloads {
            batch
                .hset(&download_map, &download.id, download.source_path.to_string_lossy())
                .hset(&page_map, &download.id, &download.page_content);
            let download_files = keys::download_files(generation, &download.id);
            for file in &download.files {
                batch.hset(&file_map, &file.id, &file.url).hset(&download_files, &file.id, &file.url);
            }
        }
        batch
    }

    // =========================================================================
    // Counters
    // =========================================================================

    /// Delete counters of files that are not part of `batch`.
    ///
    /// Only call this after `batch` has been published. Returns the number of
    /// counters removed.
    #[instrument(skip_all)]
    pub async fn prune_counters(&self, batch: &[Download]) -> Result<u64> {
        let keep: HashSet<&str> = batch.iter().flat_map(|d| d.files.iter().map(|f| f.id.as_str())).collect();
        let mut deleted = 0;
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .store
                .hscan(keys::COUNTERS, cursor.as_deref(), keys::SCAN_COUNT)
                .await
                .or_raise(|| ErrorKind::Store)?;
            let stale: Vec<String> =
                page.items.into_iter().map(|(field, _)| field).filter(|id| !keep.contains(id.as_str())).collect();
            if !stale.is_empty() {
                deleted += self.store.hdel(keys::COUNTERS, &stale).await.or_raise(|| ErrorKind::Store)?;
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        info!(deleted, "pruned counters of removed files");
        Ok(deleted)
    }

    pub async fn increment_file_counter(&self, id: &str) -> Result<i64> {
        self.store.hincr_by(keys::COUNTERS, id, 1).await.or_raise(|| ErrorKind::Store)
    }

    /// Counters of every file in a download of the active generation, keyed
    /// by file id. Files that were never downloaded count as zero.
    pub async fn download_counters(&self, download_id: &str) -> Result<HashMap<String, i64>> {
        let Some(generation) = self.active() else {
            return Ok(HashMap::new());
        };
        let files = self
            .store
            .hget_all(&keys::download_files(generation, download_id))
            .await
            .or_raise(|| ErrorKind::Store)?;
        let ids: Vec<String> = files.into_keys().collect();
        let values = self.store.hmget(keys::COUNTERS, &ids).await.or_raise(|| ErrorKind::Store)?;
        let mut counters = HashMap::with_capacity(ids.len());
        for (id, value) in ids.into_iter().zip(values) {
            if let Some(counter) = parse_counter(&id, value.as_deref()) {
                counters.insert(id, counter);
            }
        }
        Ok(counters)
    }

    /// Every download of the active generation with its file counters, read
    /// lazily one download at a time. The stream ends after the first error.
    pub fn counters_stream(&self) -> impl Stream<Item = Result<DownloadCounters>> + '_ {
        stream! {
            let Some(generation) = self.active() else {
                return;
            };
            let downloads = match self.store.hget_all(&keys::downloads(generation)).await {
                Ok(downloads) => downloads,
                Err(err) => {
                    yield Err(err.raise(ErrorKind::Store));
                    return;
                },
            };
            for (id, path) in downloads {
                match self.counters_of(generation, id, path).await {
                    Ok(counters) => yield Ok(counters),
                    Err(err) => {
                        yield Err(err.raise(ErrorKind::Store));
                        return;
                    },
                }
            }
        }
    }

    async fn counters_of(&self, generation: Generation, id: String, path: String) -> StoreResult<DownloadCounters> {
        let files = self.store.hget_all(&keys::download_files(generation, &id)).await?;
        let ids: Vec<String> = files.keys().cloned().collect();
        let values = match ids.is_empty() {
            true => Vec::new(),
            false => self.store.hmget(keys::COUNTERS, &ids).await?,
        };
        let files = files
            .into_iter()
            .zip(values)
            .map(|((file_id, url), value)| {
                let counter = parse_counter(&file_id, value.as_deref()).unwrap_or(0);
                FileCounter::from_url(file_id, url, counter)
            })
            .collect();
        Ok(DownloadCounters { id, path, files })
    }

    // =========================================================================
    // Readers
    // =========================================================================

    /// Summary of the active generation, ordered by source path.
    pub async fn info(&self) -> Result<Vec<ShareInfo>> {
        let Some(generation) = self.active() else {
            exn::bail!(ErrorKind::NoDownloads);
        };
        let downloads = self.store.hget_all(&keys::downloads(generation)).await.or_raise(|| ErrorKind::Store)?;
        if downloads.is_empty() {
            exn::bail!(ErrorKind::NoDownloads);
        }
        let mut infos = Vec::with_capacity(downloads.len());
        for (id, path) in downloads {
            let files = self
                .store
                .hget_all(&keys::download_files(generation, &id))
                .await
                .or_raise(|| ErrorKind::Store)?;
            infos.push(ShareInfo {
                id,
                source_path: PathBuf::from(path),
                file_count: files.len(),
            });
        }
        infos.sort_by(|a, b| a.source_path.cmp(&b.source_path));
        Ok(infos)
    }

    /// Rendered page of a download in the active generation.
    pub async fn page(&self, id: &str) -> Result<String> {
        let not_found = || ErrorKind::PageNotFound(id.to_string());
        let Some(generation) = self.active() else {
            exn::bail!(not_found());
        };
        let page = self.store.hget(&keys::pages(generation), id).await.or_raise(|| ErrorKind::Store)?;
        page.ok_or_else(|| exn::Exn::from(not_found()))
    }

    /// Public url of a file in the active generation.
    pub async fn file_url(&self, id: &str) -> Result<String> {
        let not_found = || ErrorKind::FileNotFound(id.to_string());
        let Some(generation) = self.active() else {
            exn::bail!(not_found());
        };
        let url = self.store.hget(&keys::files(generation), id).await.or_raise(|| ErrorKind::Store)?;
        url.ok_or_else(|| exn::Exn::from(not_found()))
    }
}

fn parse_counter(id: &str, value: Option<&str>) -> Option<i64> {
    let Some(value) = value else {
        return Some(0);
    };
    match value.parse() {
        Ok(counter) => Some(counter),
        Err(err) => {
            warn!(file = %id, value = %value, error = %err, "ignoring unparsable counter");
            None
        },
    }
}
