//! Batch writer.
//!
//! Buffers normalized companies and hands them to a [`Store`] in fixed-size
//! batches, one transaction each. Batches are disjoint and committed in
//! stream order; once [`BatchWriter::write`] or [`BatchWriter::flush`]
//! returns `Ok`, the rows it committed stay committed.
//!
//! When a checkpoint key is set, every commit also records the absolute
//! source position it covers: all records up to and including the last one
//! handed to the writer, whether that record was buffered or rejected.

use anyhow::Result;

use crate::models::{Checkpoint, Company};
use crate::store::Store;

pub struct BatchWriter<'a> {
    store: &'a dyn Store,
    batch_size: usize,
    buffer: Vec<Company>,
    checkpoint_source: Option<String>,
    position: u64,
    committed_position: u64,
    committed_rows: u64,
    committed_batches: u64,
}

impl<'a> BatchWriter<'a> {
    /// A writer committing every `batch_size` rows (at least one).
    pub fn new(store: &'a dyn Store, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            checkpoint_source: None,
            position: 0,
            committed_position: 0,
            committed_rows: 0,
            committed_batches: 0,
        }
    }

    /// Record a checkpoint for `source` with every commit, starting at `start`.
    pub fn with_checkpoint(mut self, source: impl Into<String>, start: u64) -> Self {
        self.checkpoint_source = Some(source.into());
        self.position = start;
        self.committed_position = start;
        self
    }

    /// Buffer `company`, read from the record ending at absolute `position`.
    ///
    /// Commits when the buffer is full and returns the number of rows that
    /// commit wrote.
    pub async fn write(&mut self, company: Company, position: u64) -> Result<Option<u64>> {
        self.buffer.push(company);
        self.advance(position);
        if self.buffer.len() >= self.batch_size {
            return self.commit().await.map(Some);
        }
        Ok(None)
    }

    /// Note that the record ending at `position` was handled without a write.
    pub fn advance(&mut self, position: u64) {
        self.position = self.position.max(position);
    }

    /// Commit whatever is buffered. Returns the number of rows written.
    pub async fn flush(&mut self) -> Result<u64> {
        let checkpoint_moved =
            self.checkpoint_source.is_some() && self.position > self.committed_position;
        if self.buffer.is_empty() && !checkpoint_moved {
            return Ok(0);
        }
        self.commit().await
    }

    async fn commit(&mut self) -> Result<u64> {
        let checkpoint = self.checkpoint_source.as_ref().map(|source| Checkpoint {
            source: source.clone(),
            offset: self.position,
            updated_at: chrono::Utc::now().timestamp(),
        });

        // On failure the buffer is kept so nothing is silently dropped.
        let written = self.store.upsert_batch(&self.buffer, checkpoint.as_ref()).await?;

        self.buffer.clear();
        self.committed_rows += written;
        self.committed_position = self.position;
        if written > 0 {
            self.committed_batches += 1;
        }
        tracing::debug!(
            rows = written,
            batch = self.committed_batches,
            position = self.committed_position,
            "committed batch"
        );
        Ok(written)
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn committed_rows(&self) -> u64 {
        self.committed_rows
    }

    pub fn committed_batches(&self) -> u64 {
        self.committed_batches
    }

    /// Absolute source position covered by the last commit.
    pub fn committed_position(&self) -> u64 {
        self.committed_position
    }
}
