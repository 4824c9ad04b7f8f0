//! Fix-up DML materialization.
//!
//! Values of text-quoted types are wrapped in single quotes **without
//! escaping**, preserving bit-compatibility with the downstream tooling that
//! consumes these patches. Values containing a single quote therefore produce
//! SQL that needs escaping before execution; this is deliberate and must not
//! be fixed silently here. Binary columns are the exception: their payloads
//! carry no text guarantee, so they render as hex `X'...'` literals, which
//! round-trip arbitrary bytes exactly.

use crate::core::identifier::{qualify, quote_ident};
use crate::core::schema::{Column, TableSchema};
use crate::core::value::{ColumnValue, RowRecord};

/// Render one value as a SQL literal.
fn literal(value: &ColumnValue, col: &Column) -> String {
    if value.is_null {
        return "NULL".to_string();
    }
    if col.is_binary_type() {
        format!("X'{}'", hex::encode(&value.data))
    } else if col.is_quoted_type() {
        format!("'{}'", value.as_text())
    } else {
        value.as_text().into_owned()
    }
}

/// `REPLACE INTO schema.table(col, ...) VALUES (v, ...);` over the declared
/// schema columns, in declared order. Columns absent from the row (excluded
/// from the scan projection) are skipped.
pub fn replace_statement(
    row: &RowRecord,
    info: &TableSchema,
    schema: &str,
    table: &str,
) -> String {
    let mut names = Vec::with_capacity(info.columns.len());
    let mut values = Vec::with_capacity(info.columns.len());
    for col in &info.columns {
        let Some(value) = row.get(&col.name) else {
            continue;
        };
        names.push(quote_ident(&col.name));
        values.push(literal(value, col));
    }

    format!(
        "REPLACE INTO {}({}) VALUES ({});",
        qualify(schema, table),
        names.join(","),
        values.join(",")
    )
}

/// `DELETE FROM schema.table WHERE k = v AND ...;` over the order-key
/// columns; NULL key values compare with `is NULL`.
pub fn delete_statement(
    row: &RowRecord,
    key_cols: &[Column],
    schema: &str,
    table: &str,
) -> String {
    let kvs: Vec<String> = key_cols
        .iter()
        .filter_map(|col| {
            let value = row.get(&col.name)?;
            Some(if value.is_null {
                format!("{} is NULL", quote_ident(&col.name))
            } else {
                format!("{} = {}", quote_ident(&col.name), literal(value, col))
            })
        })
        .collect();

    format!(
        "DELETE FROM {} WHERE {};",
        qualify(schema, table),
        kvs.join(" AND ")
    )
}
