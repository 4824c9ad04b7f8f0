//! Row-level comparison: k-way merge of the source streams and the sorted
//! diff walk against the target stream.
//!
//! The merged stream is built with a min-heap of per-source heads keyed by
//! the order-key tuple; ties pop in source order, which is deterministic but
//! order-dependent when sources overlap on a key. Non-unique order keys are
//! unsupported: an equal-key pair advances both cursors exactly once.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use tokio::sync::mpsc;
use tracing::info;

use crate::core::schema::{Column, TableSchema};
use crate::core::value::{order_key, rows_equal, OrderKey, RowRecord};
use crate::diff::dml::{delete_statement, replace_statement};
use crate::diff::PatchMessage;
use crate::error::{DiffError, Result};

/// A row paired with its eagerly extracted order key.
#[derive(Debug)]
pub(crate) struct KeyedRow {
    pub key: OrderKey,
    pub row: RowRecord,
}

/// Extract order keys for a whole stream, failing the chunk on the first row
/// that is missing a key column or holds an unparsable numeric key.
pub(crate) fn keyed(
    rows: Vec<RowRecord>,
    key_cols: &[Column],
    table: &str,
) -> Result<Vec<KeyedRow>> {
    rows.into_iter()
        .map(|row| {
            let key = order_key(&row, key_cols, table)?;
            Ok(KeyedRow { key, row })
        })
        .collect()
}

/// Heap entry: the source tag is only needed to advance the right stream and
/// to break key ties deterministically.
struct MergeItem {
    entry: KeyedRow,
    source: usize,
}

impl Ord for MergeItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.entry
            .key
            .cmp(&other.entry.key)
            .then_with(|| self.source.cmp(&other.source))
    }
}

impl PartialOrd for MergeItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for MergeItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MergeItem {}

/// Merge the per-source ordered streams into one ordered stream.
///
/// Heap size stays bounded by the number of sources: each pop re-feeds the
/// next head of the popped source.
pub(crate) fn merge_keyed(streams: Vec<Vec<KeyedRow>>) -> Vec<KeyedRow> {
    let total: usize = streams.iter().map(Vec::len).sum();
    let mut iters: Vec<_> = streams.into_iter().map(Vec::into_iter).collect();
    let mut heap = BinaryHeap::with_capacity(iters.len());

    for (source, iter) in iters.iter_mut().enumerate() {
        if let Some(entry) = iter.next() {
            heap.push(Reverse(MergeItem { entry, source }));
        }
    }

    let mut merged = Vec::with_capacity(total);
    while let Some(Reverse(item)) = heap.pop() {
        if let Some(entry) = iters[item.source].next() {
            heap.push(Reverse(MergeItem {
                entry,
                source: item.source,
            }));
        }
        merged.push(item.entry);
    }

    merged
}

/// Walk the merged source stream against the target stream and emit the
/// minimal REPLACE/DELETE sequence that makes the target equal.
///
/// Every statement is pushed to the patch channel before the walk advances,
/// so the caller can flush the channel before persisting the chunk's final
/// state. Returns whether the streams were equal.
pub(crate) async fn diff_rows(
    merged: Vec<KeyedRow>,
    target: Vec<KeyedRow>,
    info: &TableSchema,
    key_cols: &[Column],
    schema: &str,
    table: &str,
    sql_tx: &mpsc::Sender<PatchMessage>,
) -> Result<bool> {
    let mut equal = true;
    let mut i = 0;
    let mut j = 0;

    let send = |sql: String| async move {
        sql_tx
            .send(PatchMessage::Dml(sql))
            .await
            .map_err(|_| DiffError::Cancelled)
    };

    loop {
        if i == merged.len() {
            // Everything left on the target side is surplus.
            while j < target.len() {
                let sql = delete_statement(&target[j].row, key_cols, schema, table);
                info!("[delete] {}", sql);
                send(sql).await?;
                equal = false;
                j += 1;
            }
            break;
        }
        if j == target.len() {
            // The target lacks everything left on the source side.
            while i < merged.len() {
                let sql = replace_statement(&merged[i].row, info, schema, table);
                info!("[insert] {}", sql);
                send(sql).await?;
                equal = false;
                i += 1;
            }
            break;
        }

        match merged[i].key.cmp(&target[j].key) {
            Ordering::Equal => {
                if !rows_equal(&merged[i].row, &target[j].row) {
                    let sql = replace_statement(&merged[i].row, info, schema, table);
                    info!("[update] {}", sql);
                    send(sql).await?;
                    equal = false;
                }
                i += 1;
                j += 1;
            }
            Ordering::Less => {
                let sql = replace_statement(&merged[i].row, info, schema, table);
                info!("[insert] {}", sql);
                send(sql).await?;
                equal = false;
                i += 1;
            }
            Ordering::Greater => {
                let sql = delete_statement(&target[j].row, key_cols, schema, table);
                info!("[delete] {}", sql);
                send(sql).await?;
                equal = false;
                j += 1;
            }
        }
    }

    Ok(equal)
}
