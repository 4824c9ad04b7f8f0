//! Chunk model: a bounded key-range slice of a table and its check state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Verification state of a chunk.
///
/// `New` chunks come from the splitter; a worker moves its chunk to
/// `Checking` when dispatched and to exactly one terminal state afterwards.
/// `Ignore` is entered only by first-pass sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    /// Not yet dispatched.
    New,
    /// Owned by a worker, verification in flight.
    Checking,
    /// Verified equal.
    Success,
    /// Verified unequal; fix-up DML was emitted (unless checksum-only mode).
    Failed,
    /// Verification itself errored.
    Error,
    /// Excluded by sampling.
    Ignore,
}

impl ChunkState {
    /// Whether this state is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChunkState::Success | ChunkState::Failed | ChunkState::Error | ChunkState::Ignore
        )
    }

    /// Stable string form used in the checkpoint table.
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkState::New => "new",
            ChunkState::Checking => "checking",
            ChunkState::Success => "success",
            ChunkState::Failed => "failed",
            ChunkState::Error => "error",
            ChunkState::Ignore => "ignore",
        }
    }

    /// Parse the checkpoint string form. Unknown states load as `New` so a
    /// checkpoint written by a newer version degrades to re-verification.
    pub fn parse(s: &str) -> ChunkState {
        match s {
            "checking" => ChunkState::Checking,
            "success" => ChunkState::Success,
            "failed" => ChunkState::Failed,
            "error" => ChunkState::Error,
            "ignore" => ChunkState::Ignore,
            _ => ChunkState::New,
        }
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An inclusive key-space slice of the table under verification.
///
/// `where_clause` is a boolean SQL fragment over the table's columns with
/// `args` bound positionally. The id is stable for the lifetime of a run and
/// doubles as the worker-affinity routing key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRange {
    /// Stable chunk id within the run.
    pub id: i64,
    /// Boolean SQL fragment selecting this chunk's rows.
    #[serde(rename = "where")]
    pub where_clause: String,
    /// Bound arguments for `where_clause`.
    pub args: Vec<String>,
    /// Current verification state.
    pub state: ChunkState,
}

impl ChunkRange {
    /// Create a fresh chunk in the `New` state.
    pub fn new(id: i64, where_clause: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            id,
            where_clause: where_clause.into(),
            args,
            state: ChunkState::New,
        }
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunk[{}] where={:?} args={:?} state={}",
            self.id, self.where_clause, self.args, self.state
        )
    }
}
