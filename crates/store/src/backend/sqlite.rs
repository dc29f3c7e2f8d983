//! SQLite-backed key-value store.

use super::{KeyValueStore, Page};
use crate::batch::{Batch, Command};
use crate::error::{ErrorKind, Result};
use crate::pattern::Pattern;
use async_trait::async_trait;
use exn::{OptionExt, ResultExt};
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::instrument;

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
const MAX_CONNECTIONS: u32 = 5;

const KIND_STRING: &str = "string";
const KIND_HASH: &str = "hash";

/// Key-value store persisted in a SQLite database.
///
/// String keys live in `kv_keys`; hash fields live in `kv_fields` and are
/// removed together with their key. Every [`apply`](KeyValueStore::apply)
/// runs in a single transaction, so a failing batch leaves nothing behind.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    async fn new(options: SqliteConnectOptions, max: Option<u32>) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Applies the query-based PRAGMAs to every pooled connection, not
            // only the first one.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max.unwrap_or(MAX_CONNECTIONS))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Connect to the store database at the given path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = Self::base_options().filename(path.as_ref()).create_if_missing(true);
        Self::new(options, None).await
    }

    /// Connect to an in-memory database.
    ///
    /// Not gated behind `#[cfg(test)]` so that other crates can use it in
    /// their tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // Every pooled connection to ":memory:" would otherwise see its own
        // empty database.
        Self::new(options, Some(1)).await
    }

    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            // Download pages hit the counter hash concurrently with an index
            // publishing its batch.
            .busy_timeout(std::time::Duration::from_millis(1500))
    }

    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA wal_autocheckpoint = 800;
                PRAGMA cache_size = -8192;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    #[instrument("performing store migrations", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the connection pool, waiting for in-flight queries to finish.
    pub async fn close(&self) {
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }

    // =========================================================================
    // Connection-level helpers, shared by single operations and batches
    // =========================================================================

    async fn kind(conn: &mut SqliteConnection, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>(include_str!("../../queries/key_kind.sql"))
            .bind(key)
            .fetch_optional(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    /// Returns `true` if the key currently holds a hash, `false` if it does
    /// not exist, and fails if it holds a string.
    async fn expect_hash(conn: &mut SqliteConnection, key: &str) -> Result<bool> {
        match Self::kind(conn, key).await?.as_deref() {
            None => Ok(false),
            Some(KIND_HASH) => Ok(true),
            Some(_) => exn::bail!(ErrorKind::WrongType(key.to_string())),
        }
    }

    /// Create the hash key if missing. The insert runs first so that a
    /// transaction calling this holds the write lock before it reads.
    async fn ensure_hash(conn: &mut SqliteConnection, key: &str) -> Result<()> {
        sqlx::query(include_str!("../../queries/insert_hash.sql"))
            .bind(key)
            .execute(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        match Self::expect_hash(conn, key).await? {
            true => Ok(()),
            false => exn::bail!(ErrorKind::InvalidData("hash key vanished during write")),
        }
    }

    async fn set_string(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<()> {
        sqlx::query(include_str!("../../queries/delete_all_fields.sql"))
            .bind(key)
            .execute(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../../queries/upsert_string.sql"))
            .bind(key)
            .bind(value)
            .execute(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn set_field(conn: &mut SqliteConnection, key: &str, field: &str, value: &str) -> Result<()> {
        Self::ensure_hash(conn, key).await?;
        sqlx::query(include_str!("../../queries/upsert_field.sql"))
            .bind(key)
            .bind(field)
            .bind(value)
            .execute(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn delete_key(conn: &mut SqliteConnection, key: &str) -> Result<u64> {
        let result = sqlx::query(include_str!("../../queries/delete_key.sql"))
            .bind(key)
            .execute(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }

    async fn delete_fields(conn: &mut SqliteConnection, key: &str, fields: &[String]) -> Result<u64> {
        if !Self::expect_hash(conn, key).await? {
            return Ok(0);
        }
        let mut removed = 0;
        for field in fields {
            removed += sqlx::query(include_str!("../../queries/delete_field.sql"))
                .bind(key)
                .bind(field)
                .execute(&mut *conn)
                .await
                .or_raise(|| ErrorKind::Database)?
                .rows_affected();
        }
        sqlx::query(include_str!("../../queries/delete_empty_hash.sql"))
            .bind(key)
            .execute(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(removed)
    }

    async fn get_field(conn: &mut SqliteConnection, key: &str, field: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>(include_str!("../../queries/get_field.sql"))
            .bind(key)
            .bind(field)
            .fetch_optional(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)
    }

    async fn apply_command(conn: &mut SqliteConnection, command: &Command) -> Result<()> {
        match command {
            Command::Set { key, value } => Self::set_string(conn, key, value).await,
            Command::HSet { key, field, value } => Self::set_field(conn, key, field, value).await,
            Command::Del { key } => Self::delete_key(conn, key).await.map(|_| ()),
            Command::HDel { key, field } => Self::delete_fields(conn, key, std::slice::from_ref(field)).await.map(|_| ()),
        }
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        self.pool.acquire().await.or_raise(|| ErrorKind::Database)
    }
}

fn sql_limit(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.acquire().await?;
        match Self::kind(&mut conn, key).await?.as_deref() {
            None => return Ok(None),
            Some(KIND_STRING) => {},
            Some(_) => exn::bail!(ErrorKind::WrongType(key.to_string())),
        }
        sqlx::query_scalar::<_, Option<String>>(include_str!("../../queries/get_string.sql"))
            .bind(key)
            .fetch_optional(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)
            .map(Option::flatten)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        Self::set_string(&mut tx, key, value).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)
    }

    async fn delete(&self, keys: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let mut removed = 0;
        for key in keys {
            removed += Self::delete_key(&mut tx, key).await?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(removed)
    }

    async fn scan(&self, cursor: Option<&str>, pattern: &Pattern, count: usize) -> Result<Page<String>> {
        let items = sqlx::query_scalar::<_, String>(include_str!("../../queries/scan_keys.sql"))
            .bind(cursor)
            .bind(pattern.to_sqlite_glob())
            .bind(sql_limit(count))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(Page::from_items(items, count, Clone::clone))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.acquire().await?;
        if !Self::expect_hash(&mut conn, key).await? {
            return Ok(None);
        }
        Self::get_field(&mut conn, key, field).await
    }

    async fn hmget(&self, key: &str, fields: &[String]) -> Result<Vec<Option<String>>> {
        let mut conn = self.acquire().await?;
        if !Self::expect_hash(&mut conn, key).await? {
            return Ok(vec![None; fields.len()]);
        }
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            values.push(Self::get_field(&mut conn, key, field).await?);
        }
        Ok(values)
    }

    async fn hget_all(&self, key: &str) -> Result<BTreeMap<String, String>> {
        let mut conn = self.acquire().await?;
        if !Self::expect_hash(&mut conn, key).await? {
            return Ok(BTreeMap::new());
        }
        let rows = sqlx::query_as::<_, (String, String)>(include_str!("../../queries/get_all_fields.sql"))
            .bind(key)
            .fetch_all(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(rows.into_iter().collect())
    }

    async fn hscan(&self, key: &str, cursor: Option<&str>, count: usize) -> Result<Page<(String, String)>> {
        let mut conn = self.acquire().await?;
        if !Self::expect_hash(&mut conn, key).await? {
            return Ok(Page { items: Vec::new(), next: None });
        }
        let items = sqlx::query_as::<_, (String, String)>(include_str!("../../queries/scan_fields.sql"))
            .bind(key)
            .bind(cursor)
            .bind(sql_limit(count))
            .fetch_all(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(Page::from_items(items, count, |(field, _)| field.clone()))
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let removed = Self::delete_fields(&mut tx, key, fields).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(removed)
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        Self::ensure_hash(&mut tx, key).await?;
        let current = match Self::get_field(&mut tx, key, field).await? {
            Some(value) => value.parse::<i64>().or_raise(|| ErrorKind::InvalidData("hash value is not an integer"))?,
            None => 0,
        };
        let updated = current.checked_add(delta).ok_or_raise(|| ErrorKind::InvalidData("increment overflow"))?;
        sqlx::query(include_str!("../../queries/upsert_field.sql"))
            .bind(key)
            .bind(field)
            .bind(updated.to_string())
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(updated)
    }

    async fn apply(&self, batch: Batch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        for command in batch.iter() {
            Self::apply_command(&mut tx, command).await?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)
    }
}
