//! Datasource abstraction: how the engine talks to a physical table.
//!
//! The diff core never builds connections itself; every table arrives as a
//! [`TableRef`] carrying an opaque query channel. Implementations provide
//! three capabilities: structural metadata, ordered range scans and
//! CRC-style chunk checksums. The shipped implementation is
//! [`mysql::MysqlDatasource`]; tests use an in-memory fixture.

pub mod mysql;

pub use self::mysql::MysqlDatasource;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::core::schema::TableSchema;
use crate::core::value::RowRecord;
use crate::error::Result;

/// An ordered range scan over one table, scoped to a chunk.
#[derive(Debug, Clone)]
pub struct RowScan<'a> {
    /// Schema (database) name.
    pub schema: &'a str,
    /// Table name.
    pub table: &'a str,
    /// Resolved schema of the table, including the order key.
    pub info: &'a TableSchema,
    /// Chunk predicate.
    pub where_clause: &'a str,
    /// Bound arguments for the predicate.
    pub args: &'a [String],
    /// Columns excluded from the projection and from comparison.
    pub ignore_columns: &'a [String],
    /// Collation for ORDER BY, empty for the connection default.
    pub collation: &'a str,
}

/// A CRC-style checksum over one table's chunk rows.
#[derive(Debug, Clone)]
pub struct ChecksumRequest<'a> {
    /// Schema (database) name.
    pub schema: &'a str,
    /// Table name.
    pub table: &'a str,
    /// Resolved schema of the table.
    pub info: &'a TableSchema,
    /// Chunk predicate.
    pub where_clause: &'a str,
    /// Bound arguments for the predicate.
    pub args: &'a [String],
    /// Columns excluded from the checksum.
    pub ignore_columns: &'a [String],
}

/// Query channel to one physical endpoint.
///
/// Implementations must be cheap to share; the worker pool issues up to
/// `check_thread_count + 1` concurrent calls against the same handle.
#[async_trait]
pub trait Datasource: Send + Sync {
    /// Resolve the table's schema: ordered columns and the selected
    /// unique-order key. When `use_row_id` is set and the table has no
    /// unique key, the implicit row-id column becomes the order key.
    async fn table_schema(
        &self,
        schema: &str,
        table: &str,
        use_row_id: bool,
    ) -> Result<TableSchema>;

    /// Fetch the chunk's rows in order-key order.
    async fn scan_rows(&self, scan: &RowScan<'_>) -> Result<Vec<RowRecord>>;

    /// Compute the chunk's CRC32 checksum. Must be order-independent over
    /// the selected rows; an empty selection yields 0.
    async fn checksum(&self, req: &ChecksumRequest<'_>) -> Result<i64>;
}

/// Address of one physical table plus its query channel.
///
/// `instance_id` uniquely identifies the physical endpoint and keys the
/// checkpoint rows. The resolved `info` is populated at run start; only the
/// address participates in the run fingerprint.
#[derive(Clone, Serialize)]
pub struct TableRef {
    /// Query channel for this endpoint.
    #[serde(skip)]
    pub handle: Arc<dyn Datasource>,
    /// Schema (database) name.
    pub schema: String,
    /// Table name.
    pub table: String,
    /// Unique identifier of the physical endpoint.
    #[serde(rename = "instance-id")]
    pub instance_id: String,
    /// Resolved schema, populated by the run.
    #[serde(skip)]
    pub info: Option<TableSchema>,
}

impl TableRef {
    /// Create an unresolved table reference.
    pub fn new(
        handle: Arc<dyn Datasource>,
        schema: impl Into<String>,
        table: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            handle,
            schema: schema.into(),
            table: table.into(),
            instance_id: instance_id.into(),
            info: None,
        }
    }

    /// `schema.table` for log messages.
    pub fn name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }

    /// Address of this table for checkpoint rows.
    pub fn locator(&self) -> crate::checkpoint::TableLocator<'_> {
        crate::checkpoint::TableLocator {
            instance_id: &self.instance_id,
            schema: &self.schema,
            table: &self.table,
        }
    }

    /// The resolved schema.
    ///
    /// # Panics
    ///
    /// Panics if called before the run resolved the schema.
    pub fn schema_info(&self) -> &TableSchema {
        self.info
            .as_ref()
            .expect("table schema resolved at run start")
    }
}

impl std::fmt::Debug for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableRef")
            .field("schema", &self.schema)
            .field("table", &self.table)
            .field("instance_id", &self.instance_id)
            .field("resolved", &self.info.is_some())
            .finish()
    }
}
