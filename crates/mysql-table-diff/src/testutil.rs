//! Shared fixtures for scenario tests: an in-memory datasource, a fixed
//! splitter and a collecting fix-SQL writer.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::chunk::ChunkRange;
use crate::core::schema::{Column, TableSchema};
use crate::core::value::{order_key, ColumnValue, RowRecord};
use crate::error::Result;
use crate::source::{ChecksumRequest, Datasource, RowScan, TableRef};
use crate::splitter::{ChunkSplitter, SplitRequest};

/// The canonical two-column test schema: `id int` primary key, `name varchar`.
pub(crate) fn users_schema() -> TableSchema {
    TableSchema::new(
        vec![
            Column::new("id", "int", false),
            Column::new("name", "varchar", true),
        ],
        vec!["id".into()],
    )
}

pub(crate) fn row(pairs: &[(&str, Option<&str>)]) -> RowRecord {
    pairs
        .iter()
        .map(|(name, value)| {
            let v = match value {
                Some(text) => ColumnValue::bytes(text.as_bytes().to_vec()),
                None => ColumnValue::null(),
            };
            (name.to_string(), v)
        })
        .collect()
}

pub(crate) fn user(id: i64, name: &str) -> RowRecord {
    let id = id.to_string();
    row(&[("id", Some(id.as_str())), ("name", Some(name))])
}

/// In-memory table keyed by chunk predicate.
///
/// Rows are registered per where-clause section; a scan for `TRUE` returns
/// every section. Scan and checksum calls are counted so tests can assert
/// which chunks actually touched the table.
pub(crate) struct MemoryTable {
    schema: TableSchema,
    sections: Mutex<BTreeMap<String, Vec<RowRecord>>>,
    scans: AtomicUsize,
    checksums: AtomicUsize,
}

impl MemoryTable {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            sections: Mutex::new(BTreeMap::new()),
            scans: AtomicUsize::new(0),
            checksums: AtomicUsize::new(0),
        }
    }

    /// Replace the rows of one where-clause section.
    pub fn insert(&self, where_clause: &str, rows: Vec<RowRecord>) {
        self.sections
            .lock()
            .unwrap()
            .insert(where_clause.to_string(), rows);
    }

    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    pub fn checksum_count(&self) -> usize {
        self.checksums.load(Ordering::SeqCst)
    }

    fn select(&self, where_clause: &str) -> Vec<RowRecord> {
        let sections = self.sections.lock().unwrap();
        if where_clause == "TRUE" {
            sections.values().flatten().cloned().collect()
        } else {
            sections.get(where_clause).cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl Datasource for MemoryTable {
    async fn table_schema(
        &self,
        _schema: &str,
        _table: &str,
        _use_row_id: bool,
    ) -> Result<TableSchema> {
        Ok(self.schema.clone())
    }

    async fn scan_rows(&self, scan: &RowScan<'_>) -> Result<Vec<RowRecord>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.select(scan.where_clause);
        for row in &mut rows {
            for column in scan.ignore_columns {
                row.remove(column);
            }
        }
        let key_cols = self.schema.order_key_columns();
        let mut keyed: Vec<_> = rows
            .into_iter()
            .map(|row| {
                let key = order_key(&row, &key_cols, "memory").unwrap();
                (key, row)
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }

    async fn checksum(&self, req: &ChecksumRequest<'_>) -> Result<i64> {
        self.checksums.fetch_add(1, Ordering::SeqCst);
        let rows = self.select(req.where_clause);
        Ok(rows
            .iter()
            .map(|row| row_fingerprint(row, req.ignore_columns))
            .fold(0, |acc, h| acc ^ h))
    }
}

/// Order-independent per-row hash (FNV-1a over sorted columns), XOR-folded by
/// the checksum so it composes across sources like the SQL BIT_XOR aggregate.
fn row_fingerprint(row: &RowRecord, ignore_columns: &[String]) -> i64 {
    let mut columns: Vec<_> = row
        .iter()
        .filter(|(name, _)| !ignore_columns.contains(name))
        .collect();
    columns.sort_by(|a, b| a.0.cmp(b.0));

    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for (name, value) in columns {
        for part in [name.as_bytes(), &[value.is_null as u8][..], value.data.as_slice()] {
            for byte in part {
                hash ^= u64::from(*byte);
                hash = hash.wrapping_mul(0x100_0000_01b3);
            }
        }
    }
    hash as i64
}

/// Splitter returning a pre-built chunk layout.
pub(crate) struct FixedSplitter(pub Vec<ChunkRange>);

#[async_trait]
impl ChunkSplitter for FixedSplitter {
    async fn split(&self, _req: &SplitRequest<'_>) -> Result<Vec<ChunkRange>> {
        Ok(self.0.clone())
    }
}

/// Table reference over a memory table, addressed as `shop.users`.
pub(crate) fn table_ref(table: &Arc<MemoryTable>, instance_id: &str) -> TableRef {
    TableRef::new(table.clone(), "shop", "users", instance_id)
}

/// Fix-SQL writer that collects trimmed statements.
pub(crate) fn collect_writer() -> (
    Arc<Mutex<Vec<String>>>,
    impl FnMut(&str) -> std::io::Result<()> + Send + 'static,
) {
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = collected.clone();
    let writer = move |sql: &str| {
        sink.lock().unwrap().push(sql.trim_end().to_string());
        Ok(())
    };
    (collected, writer)
}
