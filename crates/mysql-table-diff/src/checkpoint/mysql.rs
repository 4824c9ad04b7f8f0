//! MySQL-backed checkpoint storage inside the target store.
//!
//! State lives in the `_table_diff` schema of the target endpoint, which
//! gives cross-process coordination without a separate metadata store. Rows
//! are partitioned by (instance, schema, table, chunk id), so concurrent runs
//! against different targets never conflict. A single writer per target is
//! assumed.

use async_trait::async_trait;
use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::Row;
use tracing::debug;

use crate::checkpoint::{CheckpointStore, TableLocator};
use crate::core::chunk::{ChunkRange, ChunkState};
use crate::error::Result;

/// Schema holding the `chunk` and `summary` tables.
const CHECKPOINT_SCHEMA: &str = "_table_diff";

/// Checkpoint store writing to the target MySQL endpoint.
pub struct MysqlCheckpointStore {
    pool: MySqlPool,
}

impl MysqlCheckpointStore {
    /// Create a store on the target's pool.
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for MysqlCheckpointStore {
    async fn initialize(&self) -> Result<()> {
        sqlx::query(&format!(
            "CREATE DATABASE IF NOT EXISTS `{}`",
            CHECKPOINT_SCHEMA
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS `{}`.`chunk` (
                `instance_id` VARCHAR(64) NOT NULL,
                `schema_name` VARCHAR(64) NOT NULL,
                `table_name` VARCHAR(64) NOT NULL,
                `chunk_id` BIGINT NOT NULL,
                `where_text` TEXT NOT NULL,
                `args_json` TEXT NOT NULL,
                `state` VARCHAR(16) NOT NULL,
                `updated_at` DATETIME NOT NULL,
                PRIMARY KEY (`instance_id`, `schema_name`, `table_name`, `chunk_id`)
            )",
            CHECKPOINT_SCHEMA
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS `{}`.`summary` (
                `instance_id` VARCHAR(64) NOT NULL,
                `schema_name` VARCHAR(64) NOT NULL,
                `table_name` VARCHAR(64) NOT NULL,
                `config_hash` VARCHAR(64) NOT NULL,
                `total_chunks` BIGINT NOT NULL DEFAULT 0,
                `checked_chunks` BIGINT NOT NULL DEFAULT 0,
                `state` VARCHAR(16) NOT NULL,
                `updated_at` DATETIME NOT NULL,
                PRIMARY KEY (`instance_id`, `schema_name`, `table_name`)
            )",
            CHECKPOINT_SCHEMA
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_if_fingerprint_matches(
        &self,
        target: TableLocator<'_>,
        fingerprint: &str,
    ) -> Result<Vec<ChunkRange>> {
        let stored: Option<String> = sqlx::query_scalar(&format!(
            "SELECT `config_hash` FROM `{}`.`summary`
             WHERE `instance_id` = ? AND `schema_name` = ? AND `table_name` = ?",
            CHECKPOINT_SCHEMA
        ))
        .bind(target.instance_id)
        .bind(target.schema)
        .bind(target.table)
        .fetch_optional(&self.pool)
        .await?;

        if stored.as_deref() != Some(fingerprint) {
            debug!(
                "no reusable checkpoint for {}.{} (stored hash {:?})",
                target.schema, target.table, stored
            );
            return Ok(Vec::new());
        }

        let rows: Vec<MySqlRow> = sqlx::query(&format!(
            "SELECT `chunk_id`, `where_text`, `args_json`, `state` FROM `{}`.`chunk`
             WHERE `instance_id` = ? AND `schema_name` = ? AND `table_name` = ?
             ORDER BY `chunk_id`",
            CHECKPOINT_SCHEMA
        ))
        .bind(target.instance_id)
        .bind(target.schema)
        .bind(target.table)
        .fetch_all(&self.pool)
        .await?;

        let mut chunks = Vec::with_capacity(rows.len());
        for row in rows {
            let args: Vec<String> = serde_json::from_str(row.get::<&str, _>("args_json"))?;
            let mut chunk =
                ChunkRange::new(row.get::<i64, _>("chunk_id"), row.get::<String, _>("where_text"), args);
            chunk.state = ChunkState::parse(row.get::<&str, _>("state"));
            chunks.push(chunk);
        }
        Ok(chunks)
    }

    async fn clean(&self, target: TableLocator<'_>) -> Result<()> {
        for table in ["chunk", "summary"] {
            sqlx::query(&format!(
                "DELETE FROM `{}`.`{}`
                 WHERE `instance_id` = ? AND `schema_name` = ? AND `table_name` = ?",
                CHECKPOINT_SCHEMA, table
            ))
            .bind(target.instance_id)
            .bind(target.schema)
            .bind(target.table)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn init_summary(&self, target: TableLocator<'_>, fingerprint: &str) -> Result<()> {
        sqlx::query(&format!(
            "REPLACE INTO `{}`.`summary`
             (`instance_id`, `schema_name`, `table_name`, `config_hash`,
              `total_chunks`, `checked_chunks`, `state`, `updated_at`)
             VALUES (?, ?, ?, ?, 0, 0, 'checking', NOW())",
            CHECKPOINT_SCHEMA
        ))
        .bind(target.instance_id)
        .bind(target.schema)
        .bind(target.table)
        .bind(fingerprint)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_chunk(&self, target: TableLocator<'_>, chunk: &ChunkRange) -> Result<()> {
        sqlx::query(&format!(
            "REPLACE INTO `{}`.`chunk`
             (`instance_id`, `schema_name`, `table_name`, `chunk_id`,
              `where_text`, `args_json`, `state`, `updated_at`)
             VALUES (?, ?, ?, ?, ?, ?, ?, NOW())",
            CHECKPOINT_SCHEMA
        ))
        .bind(target.instance_id)
        .bind(target.schema)
        .bind(target.table)
        .bind(chunk.id)
        .bind(&chunk.where_clause)
        .bind(serde_json::to_string(&chunk.args)?)
        .bind(chunk.state.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_summary(&self, target: TableLocator<'_>) -> Result<()> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS total,
                    COALESCE(CAST(SUM(`state` IN ('success', 'failed', 'error', 'ignore')) AS SIGNED), 0) AS checked,
                    COALESCE(CAST(SUM(`state` IN ('failed', 'error')) AS SIGNED), 0) AS unequal
             FROM `{}`.`chunk`
             WHERE `instance_id` = ? AND `schema_name` = ? AND `table_name` = ?",
            CHECKPOINT_SCHEMA
        ))
        .bind(target.instance_id)
        .bind(target.schema)
        .bind(target.table)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.get("total");
        let checked: i64 = row.get("checked");
        let unequal: i64 = row.get("unequal");
        let state = if checked < total {
            "checking"
        } else if unequal > 0 {
            "failed"
        } else {
            "success"
        };

        sqlx::query(&format!(
            "UPDATE `{}`.`summary`
             SET `total_chunks` = ?, `checked_chunks` = ?, `state` = ?, `updated_at` = NOW()
             WHERE `instance_id` = ? AND `schema_name` = ? AND `table_name` = ?",
            CHECKPOINT_SCHEMA
        ))
        .bind(total)
        .bind(checked)
        .bind(state)
        .bind(target.instance_id)
        .bind(target.schema)
        .bind(target.table)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
