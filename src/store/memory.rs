//! In-memory [`Store`] implementation for tests.
//!
//! Uses a `BTreeMap` behind `std::sync::Mutex`. A batch is applied to a copy
//! and swapped in only on success, so an injected failure leaves earlier
//! batches intact and the failing one absent.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{Checkpoint, Company};

use super::Store;

#[derive(Default)]
struct State {
    companies: BTreeMap<String, Company>,
    checkpoints: HashMap<String, Checkpoint>,
    batches: usize,
}

/// In-memory store with optional failure injection.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_on_batch: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`th call (1-based) to `upsert_batch` fail without writing.
    pub fn failing_on_batch(n: usize) -> Self {
        Self {
            fail_on_batch: Some(n),
            ..Self::default()
        }
    }

    pub fn company(&self, number: &str) -> Option<Company> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.companies.get(number).cloned())
    }

    /// Number of `upsert_batch` calls seen, an injected failure included.
    pub fn batch_calls(&self) -> usize {
        self.state.lock().map(|s| s.batches).unwrap_or(0)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_batch(&self, batch: &[Company], checkpoint: Option<&Checkpoint>) -> Result<u64> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;

        if self.fail_on_batch == Some(state.batches + 1) {
            // Counted so the next attempt goes through.
            state.batches += 1;
            bail!("injected failure on batch {}", state.batches);
        }

        let mut companies = state.companies.clone();
        for company in batch {
            companies.insert(company.company_number.clone(), company.clone());
        }
        state.companies = companies;
        if let Some(cp) = checkpoint {
            state.checkpoints.insert(cp.source.clone(), cp.clone());
        }
        state.batches += 1;
        Ok(batch.len() as u64)
    }

    async fn get_checkpoint(&self, source: &str) -> Result<Option<Checkpoint>> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(state.checkpoints.get(source).cloned())
    }

    async fn count_companies(&self) -> Result<i64> {
        let state = self
            .state
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(state.companies.len() as i64)
    }
}
