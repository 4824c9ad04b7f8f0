//! # mysql-table-diff
//!
//! Chunked data-diff engine for MySQL-family replication verification.
//!
//! Verifies that one logical target table equals the union of one or more
//! source tables and emits the REPLACE/DELETE statements that would bring
//! the target into line, with support for:
//!
//! - **Chunked verification** over bounded key ranges with a worker pool
//! - **Two-tier equality**: CRC32 chunk checksums with a row-level k-way
//!   merge fallback producing a minimal DML patch
//! - **Resumable runs** via a checkpoint persisted in the target store,
//!   keyed by a configuration fingerprint
//! - **Sampling** for spot checks of a percentage of chunks
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::io::Write;
//! use std::sync::Arc;
//!
//! use mysql_table_diff::{
//!     DiffConfig, FullTableSplitter, MysqlCheckpointStore, MysqlDatasource, TableDiff, TableRef,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> mysql_table_diff::Result<()> {
//!     let source = Arc::new(MysqlDatasource::connect("mysql://user@source:3306/shop", 8).await?);
//!     let target = Arc::new(MysqlDatasource::connect("mysql://user@target:3306/shop", 8).await?);
//!     let checkpoint = Arc::new(MysqlCheckpointStore::new(target.pool().clone()));
//!
//!     let mut diff = TableDiff::new(
//!         vec![TableRef::new(source, "shop", "users", "source-1")],
//!         TableRef::new(target, "shop", "users", "target-1"),
//!         checkpoint,
//!         Arc::new(FullTableSplitter),
//!         DiffConfig::default(),
//!     );
//!
//!     let mut out = std::fs::File::create("fix.sql")?;
//!     let (struct_equal, data_equal) = diff
//!         .equal(CancellationToken::new(), move |sql| out.write_all(sql.as_bytes()))
//!         .await?;
//!     println!("struct equal: {struct_equal}, data equal: {data_equal}");
//!     Ok(())
//! }
//! ```

pub mod checkpoint;
pub mod config;
pub mod core;
pub mod diff;
pub mod error;
pub mod source;
pub mod splitter;

#[cfg(test)]
pub(crate) mod testutil;

// Re-exports for convenient access
pub use checkpoint::{
    CheckpointStore, ChunkSummary, MemoryCheckpointStore, MysqlCheckpointStore, TableLocator,
};
pub use config::DiffConfig;
pub use crate::core::chunk::{ChunkRange, ChunkState};
pub use crate::core::schema::{Column, TableSchema};
pub use crate::core::value::{ColumnValue, RowRecord};
pub use diff::TableDiff;
pub use error::{DiffError, Result};
pub use source::{ChecksumRequest, Datasource, MysqlDatasource, RowScan, TableRef};
pub use splitter::{ChunkSplitter, FullTableSplitter, SplitRequest};
