//! MySQL/MariaDB datasource implementation.
//!
//! Uses SQLx for connection pooling and async query execution. One pool
//! serves metadata queries, chunk scans and checksum queries; the checkpoint
//! store reuses the same pool via [`MysqlDatasource::pool`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::Timelike;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Row, ValueRef};
use tracing::{debug, info};

use crate::core::identifier::{qualify, quote_ident};
use crate::core::schema::{Column, TableSchema, IMPLICIT_ROW_ID};
use crate::core::value::{ColumnValue, RowRecord};
use crate::error::Result;
use crate::source::{ChecksumRequest, Datasource, RowScan};

/// Connection pool acquire timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// MySQL datasource backed by a shared connection pool.
pub struct MysqlDatasource {
    pool: MySqlPool,
}

impl MysqlDatasource {
    /// Wrap an existing pool.
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Connect to a MySQL endpoint and verify the connection.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect(url)
            .await?;

        sqlx::query("SELECT 1").fetch_one(&pool).await?;
        info!("connected to MySQL endpoint");

        Ok(Self { pool })
    }

    /// The underlying pool, shared with the checkpoint store when the
    /// checkpoint lives in this endpoint.
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    async fn load_columns(&self, schema: &str, table: &str) -> Result<Vec<Column>> {
        // CAST to CHAR to sidestep collation differences where
        // information_schema returns VARBINARY.
        let query = r#"
            SELECT
                CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
                CAST(DATA_TYPE AS CHAR(255)) AS DATA_TYPE,
                IF(IS_NULLABLE = 'YES', 1, 0) AS is_nullable
            FROM INFORMATION_SCHEMA.COLUMNS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
            ORDER BY ORDINAL_POSITION
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(schema)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        let columns = rows
            .iter()
            .map(|row| {
                Column::new(
                    row.get::<String, _>("COLUMN_NAME"),
                    row.get::<String, _>("DATA_TYPE"),
                    row.get::<i32, _>("is_nullable") == 1,
                )
            })
            .collect();

        Ok(columns)
    }

    /// Unique key column sets, PRIMARY first, then unique indexes in name
    /// order.
    async fn load_unique_keys(&self, schema: &str, table: &str) -> Result<Vec<Vec<String>>> {
        let query = r#"
            SELECT
                CAST(INDEX_NAME AS CHAR(255)) AS INDEX_NAME,
                CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME
            FROM INFORMATION_SCHEMA.STATISTICS
            WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND NON_UNIQUE = 0
            ORDER BY (INDEX_NAME = 'PRIMARY') DESC, INDEX_NAME, SEQ_IN_INDEX
        "#;

        let rows: Vec<MySqlRow> = sqlx::query(query)
            .bind(schema)
            .bind(table)
            .fetch_all(&self.pool)
            .await?;

        let mut keys: Vec<(String, Vec<String>)> = Vec::new();
        for row in rows {
            let index: String = row.get("INDEX_NAME");
            let column: String = row.get("COLUMN_NAME");
            match keys.last_mut() {
                Some((name, cols)) if *name == index => cols.push(column),
                _ => keys.push((index, vec![column])),
            }
        }

        Ok(keys.into_iter().map(|(_, cols)| cols).collect())
    }
}

#[async_trait]
impl Datasource for MysqlDatasource {
    async fn table_schema(
        &self,
        schema: &str,
        table: &str,
        use_row_id: bool,
    ) -> Result<TableSchema> {
        let columns = self.load_columns(schema, table).await?;
        let unique_keys = self.load_unique_keys(schema, table).await?;

        let order_key = match unique_keys.into_iter().next() {
            Some(key) => key,
            None if use_row_id => vec![IMPLICIT_ROW_ID.to_string()],
            // No unique key and no implicit row id: order over every column.
            None => columns.iter().map(|c| c.name.clone()).collect(),
        };

        debug!(
            "resolved schema for {}.{}: {} columns, order key {:?}",
            schema,
            table,
            columns.len(),
            order_key
        );

        Ok(TableSchema::new(columns, order_key))
    }

    async fn scan_rows(&self, scan: &RowScan<'_>) -> Result<Vec<RowRecord>> {
        let projected = projected_columns(scan.info, scan.ignore_columns);
        let query = scan_query(scan);
        debug!("select data: {} args={:?}", query, scan.args);

        let mut q = sqlx::query(&query);
        for arg in scan.args {
            q = q.bind(arg);
        }
        let rows: Vec<MySqlRow> = q.fetch_all(&self.pool).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = RowRecord::with_capacity(projected.len());
            for (idx, col) in projected.iter().enumerate() {
                record.insert(col.name.clone(), column_value(row, idx, &col.data_type)?);
            }
            records.push(record);
        }

        Ok(records)
    }

    async fn checksum(&self, req: &ChecksumRequest<'_>) -> Result<i64> {
        let query = checksum_query(req);
        debug!("checksum: {} args={:?}", query, req.args);

        let mut q = sqlx::query(&query);
        for arg in req.args {
            q = q.bind(arg);
        }
        let row = q.fetch_one(&self.pool).await?;
        Ok(row.get::<i64, _>(0))
    }
}

/// Columns of the scan projection, in declared order: the schema columns
/// minus `ignore_columns`, plus the implicit row-id column when it is the
/// order key.
fn projected_columns(info: &TableSchema, ignore_columns: &[String]) -> Vec<Column> {
    let mut projected: Vec<Column> = info
        .columns
        .iter()
        .filter(|c| !ignore_columns.contains(&c.name))
        .cloned()
        .collect();
    if info.uses_implicit_row_id() {
        projected.push(Column::new(IMPLICIT_ROW_ID, "bigint", false));
    }
    projected
}

/// Build the ordered range-scan query for one chunk.
///
/// The read-only hint marker bypasses the query cache on older servers.
pub(crate) fn scan_query(scan: &RowScan<'_>) -> String {
    let columns = if scan.ignore_columns.is_empty() && !scan.info.uses_implicit_row_id() {
        "*".to_string()
    } else {
        projected_columns(scan.info, scan.ignore_columns)
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let order_keys = scan
        .info
        .order_key
        .iter()
        .map(|k| quote_ident(k))
        .collect::<Vec<_>>()
        .join(",");

    let collation = if scan.collation.is_empty() {
        String::new()
    } else {
        format!(" COLLATE \"{}\"", scan.collation)
    };

    format!(
        "SELECT /*!40001 SQL_NO_CACHE */ {} FROM {} WHERE {} ORDER BY {}{}",
        columns,
        qualify(scan.schema, scan.table),
        scan.where_clause,
        order_keys,
        collation
    )
}

/// Build the CRC32 checksum query for one chunk.
///
/// CRC32 over the comma-joined column values plus a NULL-flag suffix, folded
/// with BIT_XOR so the aggregate is order-independent. An empty selection
/// yields 0.
pub(crate) fn checksum_query(req: &ChecksumRequest<'_>) -> String {
    let columns: Vec<&Column> = req
        .info
        .columns
        .iter()
        .filter(|c| !req.ignore_columns.contains(&c.name))
        .collect();

    let names = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let null_flags = columns
        .iter()
        .map(|c| format!("ISNULL({})", quote_ident(&c.name)))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "SELECT COALESCE(CAST(BIT_XOR(CAST(CRC32(CONCAT_WS(',', {}, CONCAT({}))) AS UNSIGNED)) AS SIGNED), 0) AS checksum FROM {} WHERE {}",
        names,
        null_flags,
        qualify(req.schema, req.table),
        req.where_clause
    )
}

/// Decode one cell into its canonical text bytes.
///
/// The canonical rendering matches what both sides of the diff produce for
/// the same value, so byte equality is value equality per type family.
fn column_value(row: &MySqlRow, idx: usize, data_type: &str) -> Result<ColumnValue> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(ColumnValue::null());
    }

    let text = match data_type {
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" => {
            decode_int(row, idx)?
        }
        "float" => row.try_get::<f32, _>(idx)?.to_string(),
        "double" | "real" => row.try_get::<f64, _>(idx)?.to_string(),
        "decimal" | "numeric" => row.try_get::<rust_decimal::Decimal, _>(idx)?.to_string(),
        "bit" | "boolean" | "bool" => match row.try_get::<bool, _>(idx) {
            Ok(v) => if v { "1" } else { "0" }.to_string(),
            Err(_) => row.try_get::<u64, _>(idx)?.to_string(),
        },
        "year" => match row.try_get::<u16, _>(idx) {
            Ok(v) => v.to_string(),
            Err(_) => decode_int(row, idx)?,
        },
        "date" => row
            .try_get::<chrono::NaiveDate, _>(idx)?
            .format("%Y-%m-%d")
            .to_string(),
        "time" => match row.try_get::<chrono::NaiveTime, _>(idx) {
            Ok(v) => v.format("%H:%M:%S").to_string(),
            // TIME values outside 00:00:00..23:59:59 only round-trip as text.
            Err(_) => row.try_get::<String, _>(idx)?,
        },
        "datetime" | "timestamp" => {
            let dt = match row.try_get::<chrono::NaiveDateTime, _>(idx) {
                Ok(v) => v,
                Err(_) => row.try_get::<chrono::DateTime<chrono::Utc>, _>(idx)?.naive_utc(),
            };
            if dt.nanosecond() == 0 {
                dt.format("%Y-%m-%d %H:%M:%S").to_string()
            } else {
                dt.format("%Y-%m-%d %H:%M:%S%.f").to_string()
            }
        }
        "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
            return Ok(ColumnValue::bytes(row.try_get::<Vec<u8>, _>(idx)?));
        }
        "char" | "varchar" | "tinytext" | "text" | "mediumtext" | "longtext" | "enum" | "set"
        | "json" => row.try_get::<String, _>(idx)?,
        _ => match row.try_get::<String, _>(idx) {
            Ok(v) => v,
            Err(_) => return Ok(ColumnValue::bytes(row.try_get::<Vec<u8>, _>(idx)?)),
        },
    };

    Ok(ColumnValue::bytes(text.into_bytes()))
}

/// Integer decode covering both signed and unsigned columns.
fn decode_int(row: &MySqlRow, idx: usize) -> Result<String> {
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Ok(v.to_string());
    }
    Ok(row.try_get::<u64, _>(idx)?.to_string())
}
