//! Versioned storage of download records.
//!
//! Records are published into one of two generations ("A" and "B") while
//! readers keep resolving the other one. A single pointer key decides which
//! generation is live; flipping it is the only step readers can observe, so
//! they see either the complete old snapshot or the complete new one.
//!
//! Per-file download counters live outside the generations and survive every
//! swap; [`Repository::prune_counters`] removes the ones whose files are gone.

pub mod error;
mod generation;
pub mod keys;
mod repository;

pub use crate::generation::{ActiveGeneration, Generation};
pub use crate::repository::Repository;
