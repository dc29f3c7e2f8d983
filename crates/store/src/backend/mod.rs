//! Key-value store trait and implementations.
//!
//! This module defines the [`KeyValueStore`] trait, which provides a unified
//! interface over whichever key-value technology backs a deployment. The
//! operation set is deliberately Redis-shaped: plain string keys, hash keys
//! with fields, cursor-based enumeration and pipelined writes.

#[cfg(feature = "mock")]
mod faulty;
mod memory;
mod sqlite;

#[cfg(feature = "mock")]
pub use self::faulty::{FaultyStore, Operation};
pub use self::memory::MemoryStore;
pub use self::sqlite::SqliteStore;
use crate::batch::Batch;
use crate::error::Result;
use crate::pattern::Pattern;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// One page of a cursor-based enumeration.
///
/// `next` is the cursor to pass into the following call, or [`None`] once
/// the enumeration is exhausted. Cursors are "resume after" markers, so keys
/// deleted between pages never cause later keys to be skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}
impl<T> Page<T> {
    pub(crate) fn from_items(items: Vec<T>, count: usize, cursor_of: impl Fn(&T) -> String) -> Self {
        let next = match items.len() >= count {
            true => items.last().map(cursor_of),
            false => None,
        };
        Self { items, next }
    }
}

/// Unified interface for key-value stores.
///
/// All operations are asynchronous and act on a single key, except
/// [`apply`](Self::apply) which pipelines many writes into one round trip.
/// Nothing here is transactional across keys; consistency for readers is the
/// caller's responsibility.
///
/// # Enumeration
///
/// [`scan`](Self::scan) and [`hscan`](Self::hscan) are cursor-based: never
/// assume the store can list (or delete) everything matching a pattern in one
/// call.
///
/// ```
/// use fetchtrack_store::{KeyValueStore, Pattern, error::Result};
///
/// async fn count_keys(store: &dyn KeyValueStore, pattern: &Pattern) -> Result<usize> {
///     let mut total = 0;
///     let mut cursor = None;
///     loop {
///         let page = store.scan(cursor.as_deref(), pattern, 1000).await?;
///         total += page.items.len();
///         match page.next {
///             Some(next) => cursor = Some(next),
///             None => return Ok(total),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// Get the value of a string key.
    ///
    /// Returns [`WrongType`](crate::error::ErrorKind::WrongType) if the key
    /// holds a hash.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a string key, replacing whatever it held before (of any type).
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete keys of any type. Returns how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64>;

    /// Return up to `count` keys matching `pattern` that sort after `cursor`.
    async fn scan(&self, cursor: Option<&str>, pattern: &Pattern, count: usize) -> Result<Page<String>>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Fetch several fields of one hash at once; the result lines up with
    /// `fields`.
    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>>;

    /// Fetch every field of a hash. A missing key is an empty map.
    async fn hget_all(&self, key: &str) -> Result<BTreeMap<String, String>>;

    /// Return up to `count` `(field, value)` pairs of a hash that sort after
    /// `cursor`.
    async fn hscan(&self, key: &str, cursor: Option<&str>, count: usize) -> Result<Page<(String, String)>>;

    /// Delete fields from a hash. Returns how many existed. A hash left with no
    /// fields ceases to exist.
    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64>;

    /// Atomically add `delta` to an integer hash field (missing fields start
    /// at zero) and return the new value.
    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// Apply every command of a batch, in order, in one round trip.
    async fn apply(&self, batch: Batch) -> Result<()>;
}
