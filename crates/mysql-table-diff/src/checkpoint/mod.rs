//! Checkpoint persistence for resumable runs.
//!
//! Chunk states and a per-table summary live inside the target store itself
//! (the [`mysql::MysqlCheckpointStore`] backend), keyed by the target's
//! instance, schema and table. Different backends can be swapped at runtime;
//! the run works with `Arc<dyn CheckpointStore>`.
//!
//! Checkpoint I/O is advisory: a failed write is logged and the run carries
//! on with in-memory state. The worst case after a crash between a chunk save
//! and the next worker action is one re-verification of that chunk.

pub mod memory;
pub mod mysql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::core::chunk::ChunkRange;
use crate::error::Result;

pub use self::memory::MemoryCheckpointStore;
pub use self::mysql::MysqlCheckpointStore;

/// Address of the table a checkpoint row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableLocator<'a> {
    /// Unique identifier of the physical endpoint.
    pub instance_id: &'a str,
    /// Schema (database) name.
    pub schema: &'a str,
    /// Table name.
    pub table: &'a str,
}

/// Progress counters for one table's run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSummary {
    /// Fingerprint of the run that owns this checkpoint lineage.
    pub config_hash: String,
    /// Total chunks in the run.
    pub total_chunks: i64,
    /// Chunks that reached a terminal state.
    pub checked_chunks: i64,
    /// Aggregate state: `checking`, `success` or `failed`.
    pub state: String,
    /// Last refresh time.
    pub updated_at: DateTime<Utc>,
}

/// Persists per-chunk state and the run summary.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Ensure the backing tables exist. Idempotent.
    async fn initialize(&self) -> Result<()>;

    /// Return the saved chunk list iff the stored fingerprint equals
    /// `fingerprint`; an empty vector otherwise.
    async fn load_if_fingerprint_matches(
        &self,
        target: TableLocator<'_>,
        fingerprint: &str,
    ) -> Result<Vec<ChunkRange>>;

    /// Drop all checkpoint rows for this target.
    async fn clean(&self, target: TableLocator<'_>) -> Result<()>;

    /// Insert a fresh summary row for a new run.
    async fn init_summary(&self, target: TableLocator<'_>, fingerprint: &str) -> Result<()>;

    /// Upsert one chunk row. Atomic per chunk.
    async fn save_chunk(&self, target: TableLocator<'_>, chunk: &ChunkRange) -> Result<()>;

    /// Refresh the summary counters from the chunk rows.
    async fn update_summary(&self, target: TableLocator<'_>) -> Result<()>;
}
