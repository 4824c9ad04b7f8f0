//! Resolved table schema: ordered columns plus the selected unique-order key.
//!
//! A [`TableSchema`] is produced by the datasource once per table at the start
//! of a run and carried on the [`crate::source::TableRef`] afterwards. The
//! order key is the column set used to totally order rows inside a chunk; it
//! must be identical across the target and every source (checked by the
//! structural pre-check).

use serde::{Deserialize, Serialize};

/// Name of the implicit row-id column appended when `use_row_id` is set and a
/// table has no unique key of its own.
pub const IMPLICIT_ROW_ID: &str = "_row_id";

/// A single column of a resolved schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Lowercased base data type, e.g. `int`, `varchar`, `datetime`.
    pub data_type: String,
    /// Whether the column is nullable.
    pub nullable: bool,
}

impl Column {
    /// Create a column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into().to_lowercase(),
            nullable,
        }
    }

    /// Whether values of this column are compared and rendered as quoted text.
    pub fn is_quoted_type(&self) -> bool {
        needs_quotes(&self.data_type)
    }

    /// Whether this column carries arbitrary bytes with no text guarantee.
    pub fn is_binary_type(&self) -> bool {
        is_binary(&self.data_type)
    }
}

/// Whether a data type holds raw bytes. Binary payloads compare as byte
/// strings like the other quoted types but cannot be rendered as plain text
/// literals.
pub fn is_binary(data_type: &str) -> bool {
    matches!(
        data_type,
        "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob"
    )
}

/// Whether a data type is rendered as a quoted SQL literal and compared as a
/// byte string. Everything else is parsed and compared as a double.
pub fn needs_quotes(data_type: &str) -> bool {
    matches!(
        data_type,
        // character types
        "char" | "varchar" | "tinytext" | "text" | "mediumtext" | "longtext"
        // binary types come back over the wire as byte strings
        | "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob"
        // temporal types
        | "date" | "time" | "datetime" | "timestamp" | "year"
        // everything else that has no numeric interpretation
        | "enum" | "set" | "json"
    )
}

/// Resolved schema for one physical table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Columns in declared order.
    pub columns: Vec<Column>,
    /// Names of the selected unique-order key columns, in key order.
    pub order_key: Vec<String>,
}

impl TableSchema {
    /// Create a schema from columns and a chosen order key.
    pub fn new(columns: Vec<Column>, order_key: Vec<String>) -> Self {
        Self { columns, order_key }
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns of the order key, in key order.
    ///
    /// The implicit row-id column is not part of the declared column list; it
    /// is materialized here as a synthetic `bigint` column.
    pub fn order_key_columns(&self) -> Vec<Column> {
        self.order_key
            .iter()
            .map(|name| {
                self.column(name).cloned().unwrap_or_else(|| {
                    Column::new(name.clone(), "bigint", false)
                })
            })
            .collect()
    }

    /// Whether the order key is the implicit row-id column.
    pub fn uses_implicit_row_id(&self) -> bool {
        self.order_key.first().map(String::as_str) == Some(IMPLICIT_ROW_ID)
    }

    /// Drop the named columns from the schema and from the order key.
    pub fn remove_columns(&mut self, remove: &[String]) {
        if remove.is_empty() {
            return;
        }
        self.columns.retain(|c| !remove.contains(&c.name));
        self.order_key.retain(|k| !remove.contains(k));
    }

    /// Structural equality: same columns (name, type, nullability) in the
    /// same order and the same selected order key.
    pub fn structurally_equal(&self, other: &TableSchema) -> bool {
        self.columns == other.columns && self.order_key == other.order_key
    }

    /// Whether both schemas selected the same order-key column set.
    pub fn same_order_key(&self, other: &TableSchema) -> bool {
        self.order_key == other.order_key
    }
}
