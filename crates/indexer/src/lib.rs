//! Index orchestration.
//!
//! One index cycle scans the work directory with a bounded pool of workers,
//! publishes the resulting downloads as a new generation and prunes counters
//! of files that disappeared. A counter dump streams the live generation with
//! its counters as JSON. Both share a single-flight slot: at most one of them
//! runs at a time per [`Indexer`].

pub mod error;
mod indexer;
pub mod scan;
mod single_flight;

pub use crate::indexer::{DEFAULT_WORKERS, Indexer};
pub use crate::single_flight::{Permit, SingleFlight};
pub use tokio_util::sync::CancellationToken;
