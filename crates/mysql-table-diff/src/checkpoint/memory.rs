//! In-memory checkpoint storage.
//!
//! Keeps the full checkpoint state in process memory. Useful for runs that
//! opt out of persistence and for tests; share one store across runs via
//! `Arc` to exercise resume semantics without a database.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::checkpoint::{CheckpointStore, ChunkSummary, TableLocator};
use crate::core::chunk::{ChunkRange, ChunkState};
use crate::error::Result;

#[derive(Default)]
struct TableState {
    fingerprint: String,
    chunks: BTreeMap<i64, ChunkRange>,
    summary: Option<ChunkSummary>,
}

/// Checkpoint store backed by process memory.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    tables: Mutex<HashMap<(String, String, String), TableState>>,
}

impl MemoryCheckpointStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn key(target: TableLocator<'_>) -> (String, String, String) {
        (
            target.instance_id.to_string(),
            target.schema.to_string(),
            target.table.to_string(),
        )
    }

    /// Current summary for a target, if one was initialized.
    pub fn summary(&self, target: TableLocator<'_>) -> Option<ChunkSummary> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(&Self::key(target))
            .and_then(|t| t.summary.clone())
    }

    /// Saved chunk states for a target, in chunk-id order.
    pub fn chunk_states(&self, target: TableLocator<'_>) -> Vec<(i64, ChunkState)> {
        let tables = self.tables.lock().unwrap();
        tables
            .get(&Self::key(target))
            .map(|t| t.chunks.values().map(|c| (c.id, c.state)).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn load_if_fingerprint_matches(
        &self,
        target: TableLocator<'_>,
        fingerprint: &str,
    ) -> Result<Vec<ChunkRange>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .get(&Self::key(target))
            .filter(|t| t.fingerprint == fingerprint)
            .map(|t| t.chunks.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn clean(&self, target: TableLocator<'_>) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        tables.remove(&Self::key(target));
        Ok(())
    }

    async fn init_summary(&self, target: TableLocator<'_>, fingerprint: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let state = tables.entry(Self::key(target)).or_default();
        state.fingerprint = fingerprint.to_string();
        state.summary = Some(ChunkSummary {
            config_hash: fingerprint.to_string(),
            total_chunks: 0,
            checked_chunks: 0,
            state: "checking".to_string(),
            updated_at: Utc::now(),
        });
        Ok(())
    }

    async fn save_chunk(&self, target: TableLocator<'_>, chunk: &ChunkRange) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let state = tables.entry(Self::key(target)).or_default();
        state.chunks.insert(chunk.id, chunk.clone());
        Ok(())
    }

    async fn update_summary(&self, target: TableLocator<'_>) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let Some(state) = tables.get_mut(&Self::key(target)) else {
            return Ok(());
        };
        let total = state.chunks.len() as i64;
        let checked = state
            .chunks
            .values()
            .filter(|c| c.state.is_terminal())
            .count() as i64;
        let unequal = state
            .chunks
            .values()
            .filter(|c| matches!(c.state, ChunkState::Failed | ChunkState::Error))
            .count() as i64;

        if let Some(summary) = state.summary.as_mut() {
            summary.total_chunks = total;
            summary.checked_chunks = checked;
            summary.state = if checked < total {
                "checking"
            } else if unequal > 0 {
                "failed"
            } else {
                "success"
            }
            .to_string();
            summary.updated_at = Utc::now();
        }
        Ok(())
    }
}
