//! Key-value store abstraction for fetchtrack.
//!
//! The indexing core only needs a handful of primitive, per-key operations:
//! string GET/SET, hash-field operations, cursor-based key enumeration and a
//! way to pipeline many writes into a single round trip. Anything offering
//! those can back a [`KeyValueStore`]; no multi-key transactions are assumed
//! by callers.
//!
//! # Backends
//! - [`MemoryStore`]: process-local, used by tests and throwaway runs.
//! - [`SqliteStore`]: durable, backed by an SQLite database via `sqlx`.

pub mod backend;
mod batch;
pub mod error;
mod pattern;

pub use crate::backend::{KeyValueStore, MemoryStore, Page, SqliteStore};
pub use crate::batch::{Batch, Command};
pub use crate::pattern::Pattern;
use std::sync::Arc;

pub type StoreHandle = Arc<dyn KeyValueStore + Send + Sync>;
