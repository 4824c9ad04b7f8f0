//! Row values and order-key comparison.
//!
//! Every fetched cell is carried as raw text bytes plus a NULL flag,
//! regardless of the column's SQL type. Quoted types compare as byte strings;
//! all other types are parsed as doubles for key comparison. NULLs are equal
//! only to NULLs.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::core::schema::Column;
use crate::error::{DiffError, Result};

/// One cell: the canonical text bytes and whether the value was SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnValue {
    /// Canonical text rendering of the value. Empty for NULL.
    pub data: Vec<u8>,
    /// Whether the value was SQL NULL.
    pub is_null: bool,
}

impl ColumnValue {
    /// A non-NULL value from text bytes.
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            is_null: false,
        }
    }

    /// A SQL NULL.
    pub fn null() -> Self {
        Self {
            data: Vec::new(),
            is_null: true,
        }
    }

    /// The value as lossy UTF-8, for logs and text-literal rendering.
    /// Binary payloads must not round-trip through this; the DML generator
    /// renders them as hex literals from the raw bytes.
    pub fn as_text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.data)
    }
}

/// A fetched row: column name to value.
pub type RowRecord = HashMap<String, ColumnValue>;

/// One component of an order key, parsed eagerly so that ordering is total.
#[derive(Debug, Clone)]
pub enum KeyPart {
    /// Byte-string comparison (quoted types).
    Text(Vec<u8>),
    /// Numeric comparison (everything else).
    Num(f64),
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyPart::Text(a), KeyPart::Text(b)) => a.cmp(b),
            (KeyPart::Num(a), KeyPart::Num(b)) => a.total_cmp(b),
            // Mixed parts cannot arise for structurally equal schemas; the
            // ordering is still total so the heap never panics.
            (KeyPart::Text(_), KeyPart::Num(_)) => Ordering::Less,
            (KeyPart::Num(_), KeyPart::Text(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyPart {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyPart {}

/// An order-key tuple. Compares lexicographically over its parts; the first
/// non-equal column decides.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderKey(pub Vec<KeyPart>);

/// Extract the order key of `row` for the given key columns, in declared key
/// order.
///
/// A missing key column or a numeric key that fails to parse is a fatal error
/// for the chunk being verified.
pub fn order_key(row: &RowRecord, key_cols: &[Column], table: &str) -> Result<OrderKey> {
    let mut parts = Vec::with_capacity(key_cols.len());
    for col in key_cols {
        let value = row
            .get(&col.name)
            .ok_or_else(|| DiffError::missing_key(table, &col.name))?;
        if col.is_quoted_type() {
            parts.push(KeyPart::Text(value.data.clone()));
        } else {
            let text = value.as_text();
            let num: f64 = text.trim().parse().map_err(|_| DiffError::KeyParse {
                column: col.name.clone(),
                value: text.into_owned(),
            })?;
            parts.push(KeyPart::Num(num));
        }
    }
    Ok(OrderKey(parts))
}

/// Row equality: every column present compares equal on bytes and NULL flag.
///
/// Ignored columns never reach the row (they are excluded from the scan
/// projection), so all remaining columns participate. Rows with different
/// column sets are unequal.
pub fn rows_equal(a: &RowRecord, b: &RowRecord) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|(name, va)| match b.get(name) {
        Some(vb) => va.data == vb.data && va.is_null == vb.is_null,
        None => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::Column;

    fn row(pairs: &[(&str, Option<&str>)]) -> RowRecord {
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

    #[test]
    fn test_numeric_key_ordering() {
        let cols = vec![Column::new("id", "int", false)];
        let k2 = order_key(&row(&[("id", Some("2"))]), &cols, "t").unwrap();
        let k10 = order_key(&row(&[("id", Some("10"))]), &cols, "t").unwrap();
        // Numeric, not lexicographic: 2 < 10.
        assert!(k2 < k10);
    }

    #[test]
    fn test_text_key_ordering() {
        let cols = vec![Column::new("name", "varchar", false)];
        let ka = order_key(&row(&[("name", Some("10"))]), &cols, "t").unwrap();
        let kb = order_key(&row(&[("name", Some("2"))]), &cols, "t").unwrap();
        // Byte-string lexicographic: "10" < "2".
        assert!(ka < kb);
    }

    #[test]
    fn test_composite_key_first_difference_decides() {
        let cols = vec![
            Column::new("a", "int", false),
            Column::new("b", "varchar", false),
        ];
        let k1 = order_key(&row(&[("a", Some("1")), ("b", Some("z"))]), &cols, "t").unwrap();
        let k2 = order_key(&row(&[("a", Some("2")), ("b", Some("a"))]), &cols, "t").unwrap();
        assert!(k1 < k2);
    }

    #[test]
    fn test_missing_key_column_errors() {
        let cols = vec![Column::new("id", "int", false)];
        let err = order_key(&row(&[("name", Some("x"))]), &cols, "db.users").unwrap_err();
        assert!(matches!(err, DiffError::MissingKeyColumn { .. }));
    }

    #[test]
    fn test_numeric_parse_failure_errors() {
        let cols = vec![Column::new("id", "int", false)];
        let err = order_key(&row(&[("id", Some("abc"))]), &cols, "t").unwrap_err();
        assert!(matches!(err, DiffError::KeyParse { .. }));
    }

    #[test]
    fn test_rows_equal() {
        let a = row(&[("id", Some("1")), ("name", Some("a"))]);
        let b = row(&[("id", Some("1")), ("name", Some("a"))]);
        assert!(rows_equal(&a, &b));

        let c = row(&[("id", Some("1")), ("name", Some("b"))]);
        assert!(!rows_equal(&a, &c));
    }

    #[test]
    fn test_null_only_equals_null() {
        let a = row(&[("name", None)]);
        let b = row(&[("name", None)]);
        let c = row(&[("name", Some(""))]);
        assert!(rows_equal(&a, &b));
        // NULL and empty string carry the same bytes but differ on the flag.
        assert!(!rows_equal(&a, &c));
    }

    #[test]
    fn test_rows_with_different_column_sets_unequal() {
        let a = row(&[("id", Some("1"))]);
        let b = row(&[("id", Some("1")), ("name", Some("a"))]);
        assert!(!rows_equal(&a, &b));
    }
}
