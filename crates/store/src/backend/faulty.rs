//! Failure-injecting store wrapper for testing.

use super::{KeyValueStore, Page};
use crate::StoreHandle;
use crate::batch::Batch;
use crate::error::{ErrorKind, Result};
use crate::pattern::Pattern;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{PoisonError, RwLock};

/// Store operations that a [`FaultyStore`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Set,
    Delete,
    Scan,
    HGet,
    HMGet,
    HGetAll,
    HScan,
    HDel,
    HIncrBy,
    Apply,
}

/// Wraps another store and fails selected operations with
/// [`ErrorKind::BackendError`] before they reach it.
///
/// [`fail_apply_after`](Self::fail_apply_after) instead lets a batch through
/// up to a number of commands and then fails, leaving it partially written.
///
/// # Examples
///
/// ```
/// use fetchtrack_store::backend::{FaultyStore, Operation};
/// use fetchtrack_store::{KeyValueStore, MemoryStore};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = FaultyStore::new(Arc::new(MemoryStore::default())).failing(Operation::Set);
/// assert!(store.set("av", "A").await.is_err());
/// store.recover(Operation::Set);
/// assert!(store.set("av", "A").await.is_ok());
/// # }
/// ```
pub struct FaultyStore {
    inner: StoreHandle,
    failing: RwLock<HashSet<Operation>>,
    apply_limit: RwLock<Option<usize>>,
}
impl FaultyStore {
    pub fn new(inner: StoreHandle) -> Self {
        Self {
            inner,
            failing: RwLock::new(HashSet::new()),
            apply_limit: RwLock::new(None),
        }
    }

    pub fn failing(self, operation: Operation) -> Self {
        self.fail(operation);
        self
    }

    /// Start failing `operation` from now on.
    pub fn fail(&self, operation: Operation) {
        self.failing.write().unwrap_or_else(PoisonError::into_inner).insert(operation);
    }

    /// Apply only the first `commands` commands of every batch, then fail.
    pub fn fail_apply_after(&self, commands: usize) {
        *self.apply_limit.write().unwrap_or_else(PoisonError::into_inner) = Some(commands);
    }

    /// Stop failing `operation`.
    pub fn recover(&self, operation: Operation) {
        self.failing.write().unwrap_or_else(PoisonError::into_inner).remove(&operation);
        if operation == Operation::Apply {
            *self.apply_limit.write().unwrap_or_else(PoisonError::into_inner) = None;
        }
    }

    fn check(&self, operation: Operation) -> Result<()> {
        if self.failing.read().unwrap_or_else(PoisonError::into_inner).contains(&operation) {
            exn::bail!(ErrorKind::BackendError(format!("injected {operation:?} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FaultyStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check(Operation::Get)?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check(Operation::Set)?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        self.check(Operation::Delete)?;
        self.inner.delete(keys).await
    }

    async fn scan(&self, cursor: Option<&str>, pattern: &Pattern, count: usize) -> Result<Page<String>> {
        self.check(Operation::Scan)?;
        self.inner.scan(cursor, pattern, count).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.check(Operation::HGet)?;
        self.inner.hget(key, field).await
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>> {
        self.check(Operation::HMGet)?;
        self.inner.hmget(key, fields).await
    }

    async fn hget_all(&self, key: &str) -> Result<BTreeMap<String, String>> {
        self.check(Operation::HGetAll)?;
        self.inner.hget_all(key).await
    }

    async fn hscan(&self, key: &str, cursor: Option<&str>, count: usize) -> Result<Page<(String, String)>> {
        self.check(Operation::HScan)?;
        self.inner.hscan(key, cursor, count).await
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        self.check(Operation::HDel)?;
        self.inner.hdel(key, fields).await
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.check(Operation::HIncrBy)?;
        self.inner.hincr_by(key, field, delta).await
    }

    async fn apply(&self, batch: Batch) -> Result<()> {
        self.check(Operation::Apply)?;
        let limit = *self.apply_limit.read().unwrap_or_else(PoisonError::into_inner);
        let Some(limit) = limit.filter(|limit| *limit < batch.len()) else {
            return self.inner.apply(batch).await;
        };
        let mut head = Batch::with_capacity(limit);
        head.extend(batch.into_iter().take(limit));
        self.inner.apply(head).await?;
        exn::bail!(ErrorKind::BackendError(format!("injected Apply failure after {limit} commands")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_partial_apply() {
        let inner = Arc::new(MemoryStore::default());
        let store = FaultyStore::new(inner.clone());
        store.fail_apply_after(2);

        let mut batch = Batch::new();
        batch.hset("dm:B", "a", "1").hset("dm:B", "b", "2").hset("fm:B", "c", "3");
        assert!(store.apply(batch.clone()).await.is_err());
        assert_eq!(inner.hget_all("dm:B").await.unwrap().len(), 2);
        assert!(inner.hget_all("fm:B").await.unwrap().is_empty());

        store.recover(Operation::Apply);
        store.apply(batch).await.unwrap();
        assert_eq!(inner.hget_all("fm:B").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_short_batch_passes_the_limit() {
        let store = FaultyStore::new(Arc::new(MemoryStore::default()));
        store.fail_apply_after(5);
        let mut batch = Batch::new();
        batch.hset("fs", "a", "1");
        store.apply(batch).await.unwrap();
    }
}
