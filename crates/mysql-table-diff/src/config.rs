//! Diff run configuration and the resumable-run fingerprint.

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::source::TableRef;

/// Recognized options for a table diff run.
///
/// Field semantics follow the external contract: `fields` is an ordered
/// order-key hint for the splitter, `range` restricts the checked key space,
/// `sample` is a percentage of chunks to verify on the first pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Ordered key hint handed to the splitter (empty: let the splitter pick).
    pub fields: String,

    /// Predicate limiting the verified key space, e.g. `age > 10 AND age < 20`.
    pub range: String,

    /// Rows per chunk handed to the splitter.
    pub chunk_size: i64,

    /// Percentage (0-100) of chunks verified on the first pass.
    pub sample: i64,

    /// Number of verification workers.
    pub check_thread_count: usize,

    /// Use the implicit row-id column as order key for tables without a
    /// unique key.
    pub use_row_id: bool,

    /// Compare chunk checksums before falling back to row comparison.
    pub use_checksum: bool,

    /// Stop at the checksum: report a mismatched chunk as failed without
    /// materializing rows.
    pub only_use_checksum: bool,

    /// Collation applied to ORDER BY, empty for the connection default.
    pub collation: String,

    /// Skip the structural pre-check.
    pub ignore_struct_check: bool,

    /// Skip the data check.
    pub ignore_data_check: bool,

    /// Resume from the persisted checkpoint when the fingerprint matches.
    pub use_checkpoint: bool,

    /// Columns excluded from comparison (still present in REPLACE DML only
    /// if scanned; see the DML module).
    pub ignore_columns: Vec<String>,

    /// Columns removed from the resolved schema entirely.
    pub remove_columns: Vec<String>,

    /// Seed for the sampling RNG; inject for deterministic tests.
    #[serde(skip)]
    pub sample_seed: Option<u64>,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            fields: String::new(),
            range: String::new(),
            chunk_size: 100,
            sample: 100,
            check_thread_count: 4,
            use_row_id: false,
            use_checksum: true,
            only_use_checksum: false,
            collation: String::new(),
            ignore_struct_check: false,
            ignore_data_check: false,
            use_checkpoint: false,
            ignore_columns: Vec::new(),
            remove_columns: Vec::new(),
            sample_seed: None,
        }
    }
}

impl DiffConfig {
    /// Coerce out-of-range options to usable values.
    pub fn adjusted(&self) -> Self {
        let mut config = self.clone();
        if config.chunk_size <= 0 {
            config.chunk_size = 100;
        }
        if config.range.is_empty() {
            config.range = "TRUE".to_string();
        }
        if config.sample <= 0 || config.sample > 100 {
            config.sample = 100;
        }
        if config.check_thread_count == 0 {
            config.check_thread_count = 4;
        }
        config
    }
}

/// Serialized view of the user-visible configuration that identifies a
/// checkpoint lineage. Worker count, checksum toggles and column filters do
/// not change what a chunk means, so they stay out of the fingerprint.
#[derive(Serialize)]
struct FingerprintView<'a> {
    #[serde(rename = "source-tables")]
    source_tables: &'a [TableRef],
    #[serde(rename = "target-table")]
    target_table: &'a TableRef,
    #[serde(rename = "stats-source")]
    stats_source: Option<&'a TableRef>,
    fields: &'a str,
    range: &'a str,
    #[serde(rename = "chunk-size")]
    chunk_size: i64,
    sample: i64,
    #[serde(rename = "use-rowid")]
    use_row_id: bool,
    collation: &'a str,
    #[serde(rename = "use-checkpoint")]
    use_checkpoint: bool,
}

/// MD5 fingerprint over the canonical serialization of the run configuration.
///
/// Two runs with equal fingerprints share a checkpoint lineage; any change
/// invalidates prior chunks.
pub fn run_fingerprint(
    sources: &[TableRef],
    target: &TableRef,
    stats_source: Option<&TableRef>,
    config: &DiffConfig,
) -> Result<String> {
    let view = FingerprintView {
        source_tables: sources,
        target_table: target,
        stats_source,
        fields: &config.fields,
        range: &config.range,
        chunk_size: config.chunk_size,
        sample: config.sample,
        use_row_id: config.use_row_id,
        collation: &config.collation,
        use_checkpoint: config.use_checkpoint,
    };

    let canonical = serde_json::to_vec(&view)?;
    let hash = hex::encode(Md5::digest(&canonical));
    debug!(
        "run config {} hash {}",
        String::from_utf8_lossy(&canonical),
        hash
    );
    Ok(hash)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testutil::{table_ref, users_schema, MemoryTable};

    #[test]
    fn test_fingerprint_stable_and_sensitive() {
        let table = Arc::new(MemoryTable::new(users_schema()));
        let sources = vec![table_ref(&table, "source-1")];
        let target = table_ref(&table, "target-1");
        let config = DiffConfig::default().adjusted();

        let base = run_fingerprint(&sources, &target, None, &config).unwrap();
        assert_eq!(
            base,
            run_fingerprint(&sources, &target, None, &config).unwrap()
        );

        // Fingerprinted fields invalidate the lineage.
        let mut resized = config.clone();
        resized.chunk_size = 500;
        assert_ne!(
            base,
            run_fingerprint(&sources, &target, None, &resized).unwrap()
        );

        // Worker count is an execution detail, not part of the lineage.
        let mut threads = config.clone();
        threads.check_thread_count = 16;
        assert_eq!(
            base,
            run_fingerprint(&sources, &target, None, &threads).unwrap()
        );
    }

    #[test]
    fn test_defaults() {
        let config = DiffConfig::default();
        assert_eq!(config.chunk_size, 100);
        assert_eq!(config.sample, 100);
        assert_eq!(config.check_thread_count, 4);
        assert!(config.use_checksum);
        assert!(!config.use_checkpoint);
    }

    #[test]
    fn test_adjusted_coerces_bad_values() {
        let config = DiffConfig {
            chunk_size: -5,
            range: String::new(),
            sample: 250,
            check_thread_count: 0,
            ..DiffConfig::default()
        };
        let adjusted = config.adjusted();
        assert_eq!(adjusted.chunk_size, 100);
        assert_eq!(adjusted.range, "TRUE");
        assert_eq!(adjusted.sample, 100);
        assert_eq!(adjusted.check_thread_count, 4);
    }

    #[test]
    fn test_adjusted_keeps_good_values() {
        let config = DiffConfig {
            chunk_size: 500,
            range: "`id` > 7".to_string(),
            sample: 25,
            check_thread_count: 2,
            ..DiffConfig::default()
        };
        let adjusted = config.adjusted();
        assert_eq!(adjusted.chunk_size, 500);
        assert_eq!(adjusted.range, "`id` > 7");
        assert_eq!(adjusted.sample, 25);
        assert_eq!(adjusted.check_thread_count, 2);
    }
}
