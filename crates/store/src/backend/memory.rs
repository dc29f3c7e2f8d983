//! In-memory key-value store.

use super::{KeyValueStore, Page};
use crate::batch::{Batch, Command};
use crate::error::{ErrorKind, Result};
use crate::pattern::Pattern;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::ops::Bound;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
enum Value {
    String(String),
    Hash(BTreeMap<String, String>),
}

type Keyspace = BTreeMap<String, Value>;

/// In-memory key-value store.
///
/// Keys live in a sorted map behind a [`RwLock`], so all trait methods can
/// operate on `&self` without external synchronisation and cursors are simply
/// "the last key returned". Ideal for unit tests and dry runs that need a
/// [`KeyValueStore`] without a database.
///
/// # Examples
///
/// ```
/// use fetchtrack_store::{KeyValueStore, MemoryStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let store = MemoryStore::default();
/// store.set("av", "A").await?;
/// assert_eq!(store.get("av").await?.as_deref(), Some("A"));
/// assert_eq!(store.hincr_by("fs", "0123", 1).await?, 1);
/// # Ok(())
/// # }
/// ```
pub struct MemoryStore {
    keys: RwLock<Keyspace>,
}
impl MemoryStore {
    fn hash<'a>(keys: &'a Keyspace, key: &str) -> Result<Option<&'a BTreeMap<String, String>>> {
        match keys.get(key) {
            None => Ok(None),
            Some(Value::Hash(hash)) => Ok(Some(hash)),
            Some(Value::String(_)) => exn::bail!(ErrorKind::WrongType(key.to_string())),
        }
    }

    fn hash_mut<'a>(keys: &'a mut Keyspace, key: &str) -> Result<&'a mut BTreeMap<String, String>> {
        let value = keys.entry(key.to_string()).or_insert_with(|| Value::Hash(BTreeMap::new()));
        match value {
            Value::Hash(hash) => Ok(hash),
            Value::String(_) => exn::bail!(ErrorKind::WrongType(key.to_string())),
        }
    }

    fn hdel_locked(keys: &mut Keyspace, key: &str, fields: &[String]) -> Result<u64> {
        let Some(value) = keys.get_mut(key) else {
            return Ok(0);
        };
        let Value::Hash(hash) = value else {
            exn::bail!(ErrorKind::WrongType(key.to_string()));
        };
        let removed = fields.iter().filter(|field| hash.remove(field.as_str()).is_some()).count() as u64;
        if hash.is_empty() {
            keys.remove(key);
        }
        Ok(removed)
    }

    fn apply_locked(keys: &mut Keyspace, command: Command) -> Result<()> {
        match command {
            Command::Set { key, value } => {
                keys.insert(key, Value::String(value));
            },
            Command::HSet { key, field, value } => {
                Self::hash_mut(keys, &key)?.insert(field, value);
            },
            Command::Del { key } => {
                keys.remove(&key);
            },
            Command::HDel { key, field } => {
                Self::hdel_locked(keys, &key, &[field])?;
            },
        }
        Ok(())
    }
}
impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            keys: RwLock::new(BTreeMap::new()),
        }
    }
}

fn after(cursor: Option<&str>) -> (Bound<&str>, Bound<&str>) {
    match cursor {
        Some(cursor) => (Bound::Excluded(cursor), Bound::Unbounded),
        None => (Bound::Unbounded, Bound::Unbounded),
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        match self.keys.read().await.get(key) {
            None => Ok(None),
            Some(Value::String(value)) => Ok(Some(value.clone())),
            Some(Value::Hash(_)) => exn::bail!(ErrorKind::WrongType(key.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.keys.write().await.insert(key.to_string(), Value::String(value.to_string()));
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let mut guard = self.keys.write().await;
        Ok(keys.iter().filter(|key| guard.remove(key.as_str()).is_some()).count() as u64)
    }

    async fn scan(&self, cursor: Option<&str>, pattern: &Pattern, count: usize) -> Result<Page<String>> {
        let guard = self.keys.read().await;
        let items: Vec<String> = guard
            .range::<str, _>(after(cursor))
            .map(|(key, _)| key)
            .filter(|key| pattern.matches(key))
            .take(count)
            .cloned()
            .collect();
        Ok(Page::from_items(items, count, Clone::clone))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let guard = self.keys.read().await;
        Ok(Self::hash(&guard, key)?.and_then(|hash| hash.get(field).cloned()))
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>> {
        let guard = self.keys.read().await;
        let hash = Self::hash(&guard, key)?;
        Ok(fields.iter().map(|field| hash.and_then(|h| h.get(field).cloned())).collect())
    }

    async fn hget_all(&self, key: &str) -> Result<BTreeMap<String, String>> {
        let guard = self.keys.read().await;
        Ok(Self::hash(&guard, key)?.cloned().unwrap_or_default())
    }

    async fn hscan(&self, key: &str, cursor: Option<&str>, count: usize) -> Result<Page<(String, String)>> {
        let guard = self.keys.read().await;
        let items: Vec<(String, String)> = match Self::hash(&guard, key)? {
            Some(hash) => hash
                .range::<str, _>(after(cursor))
                .take(count)
                .map(|(field, value)| (field.clone(), value.clone()))
                .collect(),
            None => Vec::new(),
        };
        Ok(Page::from_items(items, count, |(field, _)| field.clone()))
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        Self::hdel_locked(&mut *self.keys.write().await, key, fields)
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut guard = self.keys.write().await;
        let hash = Self::hash_mut(&mut guard, key)?;
        let current = match hash.get(field) {
            Some(value) => value.parse::<i64>().or_raise(|| ErrorKind::InvalidData("hash value is not an integer"))?,
            None => 0,
        };
        let updated = current.checked_add(delta).ok_or_raise(|| ErrorKind::InvalidData("increment overflow"))?;
        hash.insert(field.to_string(), updated.to_string());
        Ok(updated)
    }

    async fn apply(&self, batch: Batch) -> Result<()> {
        let mut guard = self.keys.write().await;
        for command in batch {
            Self::apply_locked(&mut guard, command)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect_keys(store: &MemoryStore, pattern: &str, count: usize) -> Vec<String> {
        let pattern = Pattern::new(pattern).unwrap();
        let mut keys = Vec::new();
        let mut cursor = None;
        loop {
            let page = store.scan(cursor.as_deref(), &pattern, count).await.unwrap();
            keys.extend(page.items);
            match page.next {
                Some(next) => cursor = Some(next),
                None => return keys,
            }
        }
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStore::default();
        assert_eq!(store.get("av").await.unwrap(), None);
        store.set("av", "B").await.unwrap();
        assert_eq!(store.get("av").await.unwrap().as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let store = MemoryStore::default();
        store.set("plain", "value").await.unwrap();
        let err = store.hget("plain", "field").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::WrongType(key) if key == "plain"));
        store.hincr_by("hash", "field", 1).await.unwrap();
        let err = store.get("hash").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::WrongType(_)));
    }

    #[tokio::test]
    async fn test_set_replaces_hash() {
        let store = MemoryStore::default();
        store.hincr_by("key", "field", 1).await.unwrap();
        store.set("key", "value").await.unwrap();
        assert_eq!(store.get("key").await.unwrap().as_deref(), Some("value"));
    }

    #[tokio::test]
    async fn test_scan_pages_through_matches() {
        let store = MemoryStore::default();
        for n in 0..25 {
            store.set(&format!("dfm:A:{n:03}"), "x").await.unwrap();
            store.set(&format!("dfm:B:{n:03}"), "x").await.unwrap();
        }
        let keys = collect_keys(&store, "dfm:A:*", 10).await;
        assert_eq!(keys.len(), 25);
        assert!(keys.iter().all(|k| k.starts_with("dfm:A:")));
    }

    #[tokio::test]
    async fn test_scan_survives_deletes_between_pages() {
        let store = MemoryStore::default();
        for n in 0..10 {
            store.set(&format!("k:{n}"), "x").await.unwrap();
        }
        let pattern = Pattern::new("k:*").unwrap();
        let mut cursor = None;
        let mut deleted = 0;
        loop {
            let page = store.scan(cursor.as_deref(), &pattern, 3).await.unwrap();
            deleted += store.delete(&page.items).await.unwrap();
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(deleted, 10);
        assert!(collect_keys(&store, "*", 100).await.is_empty());
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let store = MemoryStore::default();
        let mut batch = Batch::new();
        batch.hset("fm:A", "f1", "/share/a/1").hset("fm:A", "f2", "/share/a/2");
        store.apply(batch).await.unwrap();
        assert_eq!(store.hget("fm:A", "f1").await.unwrap().as_deref(), Some("/share/a/1"));
        assert_eq!(store.hget_all("fm:A").await.unwrap().len(), 2);
        let fields = vec!["f2".to_string(), "missing".to_string()];
        assert_eq!(store.hmget("fm:A", &fields).await.unwrap(), vec![Some("/share/a/2".to_string()), None]);
        assert_eq!(store.hdel("fm:A", &fields).await.unwrap(), 1);
        assert_eq!(store.hdel("fm:A", &["f1".to_string()]).await.unwrap(), 1);
        // Empty hashes disappear entirely.
        assert!(collect_keys(&store, "fm:*", 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_hscan() {
        let store = MemoryStore::default();
        for n in 0..7 {
            store.hincr_by("fs", &format!("file{n}"), n).await.unwrap();
        }
        let mut fields = Vec::new();
        let mut cursor = None;
        loop {
            let page = store.hscan("fs", cursor.as_deref(), 2).await.unwrap();
            fields.extend(page.items.into_iter().map(|(field, _)| field));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(fields.len(), 7);
        let empty = store.hscan("missing", None, 2).await.unwrap();
        assert!(empty.items.is_empty());
        assert!(empty.next.is_none());
    }

    #[tokio::test]
    async fn test_hincr_by() {
        let store = MemoryStore::default();
        assert_eq!(store.hincr_by("fs", "abc", 1).await.unwrap(), 1);
        assert_eq!(store.hincr_by("fs", "abc", 4).await.unwrap(), 5);
        let mut batch = Batch::new();
        batch.hset("fs", "bad", "not a number");
        store.apply(batch).await.unwrap();
        let err = store.hincr_by("fs", "bad", 1).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_apply_stops_at_first_failure() {
        let store = MemoryStore::default();
        store.set("plain", "value").await.unwrap();
        let mut batch = Batch::new();
        batch.hset("first", "f", "v").hset("plain", "f", "v").hset("never", "f", "v");
        assert!(store.apply(batch).await.is_err());
        assert_eq!(store.hget("first", "f").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.hget("never", "f").await.unwrap(), None);
    }
}
