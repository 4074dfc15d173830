//! Storage abstraction for the batch writer.
//!
//! The [`Store`] trait is the seam between the pipeline and the database:
//! the writer only needs "commit this batch atomically" and "where did we
//! stop last time". [`crate::sqlite_store::SqliteStore`] is the real backend;
//! [`memory::MemoryStore`] backs the writer's unit tests and can be told to
//! fail a given batch.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Checkpoint, Company};

/// Abstract storage backend for normalized companies.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_batch`](Store::upsert_batch) | Insert-or-replace a batch in one transaction |
/// | [`get_checkpoint`](Store::get_checkpoint) | Last committed resume offset for a source |
/// | [`count_companies`](Store::count_companies) | Number of stored companies |
#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert every company in `batch`, and `checkpoint` if given, atomically.
    ///
    /// Either all rows and the checkpoint persist, or none do. Returns the
    /// number of rows written.
    async fn upsert_batch(&self, batch: &[Company], checkpoint: Option<&Checkpoint>) -> Result<u64>;

    /// The checkpoint stored for `source`, if any.
    async fn get_checkpoint(&self, source: &str) -> Result<Option<Checkpoint>>;

    async fn count_companies(&self) -> Result<i64>;
}
