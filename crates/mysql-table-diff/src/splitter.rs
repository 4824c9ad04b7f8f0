//! Chunk splitting interface.
//!
//! How a table is cut into chunks (statistics buckets, random sampling of the
//! key space) is an external concern; the engine only relies on the
//! splitter's contract: the returned chunks partition the configured range
//! with no overlap, ids dense from 0.

use async_trait::async_trait;

use crate::core::chunk::ChunkRange;
use crate::error::Result;
use crate::source::TableRef;

/// Everything a splitter may consult when producing the initial chunk list.
#[derive(Debug, Clone)]
pub struct SplitRequest<'a> {
    /// Table whose key space is being split (the target, or the configured
    /// stats source).
    pub table: &'a TableRef,
    /// Ordered key hint from the configuration, empty to let the splitter
    /// pick from the resolved order key.
    pub fields: &'a str,
    /// Predicate limiting the key space.
    pub range: &'a str,
    /// Requested rows per chunk.
    pub chunk_size: i64,
    /// Collation for any ordering the splitter performs.
    pub collation: &'a str,
}

/// Produces the initial chunk list for a table.
#[async_trait]
pub trait ChunkSplitter: Send + Sync {
    /// Split the request's range into chunks, all in the `New` state.
    async fn split(&self, req: &SplitRequest<'_>) -> Result<Vec<ChunkRange>>;
}

/// Trivial splitter: one chunk covering the whole configured range.
///
/// Adequate for small tables and for callers that bring their own chunk
/// layout; large tables want a statistics-aware splitter.
pub struct FullTableSplitter;

#[async_trait]
impl ChunkSplitter for FullTableSplitter {
    async fn split(&self, req: &SplitRequest<'_>) -> Result<Vec<ChunkRange>> {
        Ok(vec![ChunkRange::new(0, req.range, Vec::new())])
    }
}
