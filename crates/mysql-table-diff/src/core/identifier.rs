//! Identifier quoting for generated SQL.
//!
//! Identifiers (schema, table and column names) cannot be bound as query
//! parameters, so every piece of dynamic SQL in this crate routes names
//! through these helpers.

/// Quote a MySQL identifier using backticks.
///
/// Escapes backticks by doubling them and wraps in backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Qualify a table name with its schema, both quoted.
pub fn qualify(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}
