//! Table diff run: chunk dispatch, two-tier verification and fix-up output.
//!
//! A [`TableDiff`] verifies that the target table equals the k-way union of
//! the source tables and streams corrective REPLACE/DELETE statements to a
//! caller-supplied writer. Chunks are dispatched to a worker pool with stable
//! id-based affinity; every chunk state change is persisted so an interrupted
//! run resumes from the checkpoint when the configuration fingerprint still
//! matches.

pub mod dml;
pub(crate) mod merge;

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::checkpoint::{CheckpointStore, TableLocator};
use crate::config::{run_fingerprint, DiffConfig};
use crate::core::chunk::{ChunkRange, ChunkState};
use crate::error::{DiffError, Result};
use crate::source::{ChecksumRequest, RowScan, TableRef};
use crate::splitter::{ChunkSplitter, SplitRequest};

use self::merge::{diff_rows, keyed, merge_keyed};

/// Base deadline for data-plane queries.
const BASE_TIMEOUT: Duration = Duration::from_secs(100);

/// Deadline for checkpoint operations.
const PERSIST_TIMEOUT: Duration = Duration::from_secs(500);

/// Capacity of each worker's inbound chunk channel.
const WORKER_CHANNEL_CAPACITY: usize = 10;

/// Capacity of the DML channel to the patch sink.
const SQL_CHANNEL_CAPACITY: usize = 16;

/// Summary refresh period.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(10);

/// Message to the patch sink.
pub(crate) enum PatchMessage {
    /// One fix-up statement.
    Dml(String),
    /// Acknowledge once everything queued before this marker was accepted.
    Flush(oneshot::Sender<()>),
}

/// A table diff run.
///
/// Construct with [`TableDiff::new`] and drive with [`TableDiff::equal`].
/// The run owns no global state; everything flows through this object.
pub struct TableDiff {
    /// Source tables whose union is the expected target content.
    pub source_tables: Vec<TableRef>,
    /// Table under verification.
    pub target_table: TableRef,
    /// Optional table the splitter should read statistics from.
    pub stats_source: Option<TableRef>,
    /// Run options.
    pub config: DiffConfig,
    /// Chunk state persistence.
    pub checkpoint: Arc<dyn CheckpointStore>,
    /// Produces the initial chunk list.
    pub splitter: Arc<dyn ChunkSplitter>,
}

/// Shared state handed to the worker tasks.
struct RunContext {
    sources: Vec<TableRef>,
    target: TableRef,
    config: DiffConfig,
    checkpoint: Arc<dyn CheckpointStore>,
    cancel: CancellationToken,
    sql_tx: mpsc::Sender<PatchMessage>,
}

impl RunContext {
    fn locator(&self) -> TableLocator<'_> {
        self.target.locator()
    }
}

impl TableDiff {
    /// Create a run over the given tables.
    pub fn new(
        source_tables: Vec<TableRef>,
        target_table: TableRef,
        checkpoint: Arc<dyn CheckpointStore>,
        splitter: Arc<dyn ChunkSplitter>,
        config: DiffConfig,
    ) -> Self {
        Self {
            source_tables,
            target_table,
            stats_source: None,
            config,
            checkpoint,
            splitter,
        }
    }

    /// Use a dedicated table for splitter statistics.
    pub fn with_stats_source(mut self, table: TableRef) -> Self {
        self.stats_source = Some(table);
        self
    }

    /// Fingerprint identifying this run's checkpoint lineage.
    pub fn fingerprint(&self) -> Result<String> {
        run_fingerprint(
            &self.source_tables,
            &self.target_table,
            self.stats_source.as_ref(),
            &self.config.adjusted(),
        )
    }

    /// Test whether the target equals the union of the sources.
    ///
    /// Returns `(struct_equal, data_equal)`. Fix-up DML is passed to
    /// `write_fix_sql`, one statement per call, newline-terminated; write
    /// errors are logged and do not fail the run. Cancellation via `cancel`
    /// abandons in-flight chunks (they stay `checking` in the checkpoint)
    /// and reports equality over the chunks checked so far.
    pub async fn equal<W>(
        &mut self,
        cancel: CancellationToken,
        write_fix_sql: W,
    ) -> Result<(bool, bool)>
    where
        W: FnMut(&str) -> io::Result<()> + Send + 'static,
    {
        let config = self.config.adjusted();

        let (sql_tx, sql_rx) = mpsc::channel(SQL_CHANNEL_CAPACITY);
        let sink = tokio::spawn(patch_sink(sql_rx, write_fix_sql, cancel.clone()));

        let (stop_tx, stop_rx) = watch::channel(false);
        let ticker = tokio::spawn(summary_ticker(
            self.checkpoint.clone(),
            self.target_table.instance_id.clone(),
            self.target_table.schema.clone(),
            self.target_table.table.clone(),
            stop_rx,
            cancel.clone(),
        ));

        let result = self.run_checks(&config, &cancel, sql_tx.clone()).await;

        drop(sql_tx);
        let _ = stop_tx.send(true);
        let _ = sink.await;
        let _ = ticker.await;

        result
    }

    async fn run_checks(
        &mut self,
        config: &DiffConfig,
        cancel: &CancellationToken,
        sql_tx: mpsc::Sender<PatchMessage>,
    ) -> Result<(bool, bool)> {
        self.resolve_schemas(config, cancel).await?;

        let mut struct_equal = true;
        let mut order_keys_match = true;
        if !config.ignore_struct_check {
            (struct_equal, order_keys_match) = self.check_table_struct();
        }

        let mut data_equal = true;
        if !config.ignore_data_check {
            if order_keys_match {
                data_equal = self.check_table_data(config, cancel, sql_tx).await?;
            } else {
                // The merge walk needs one shared order key; verifying
                // against mismatched keys would emit garbage DML.
                error!(
                    "order-key sets differ between sources and target {}, skipping data check",
                    self.target_table.name()
                );
                data_equal = false;
            }
        }

        Ok((struct_equal, data_equal))
    }

    /// Resolve target, source and stats-source schemas concurrently and
    /// apply the `remove_columns` filter.
    async fn resolve_schemas(&mut self, config: &DiffConfig, cancel: &CancellationToken) -> Result<()> {
        let tables: Vec<&TableRef> = std::iter::once(&self.target_table)
            .chain(self.source_tables.iter())
            .chain(self.stats_source.iter())
            .collect();
        let futures = tables
            .iter()
            .map(|t| t.handle.table_schema(&t.schema, &t.table, config.use_row_id));
        let infos = with_deadline(cancel, BASE_TIMEOUT, try_join_all(futures)).await?;

        let mut infos = infos.into_iter().map(|mut info| {
            info.remove_columns(&config.remove_columns);
            info
        });
        self.target_table.info = infos.next();
        for source in &mut self.source_tables {
            source.info = infos.next();
        }
        if let Some(stats) = &mut self.stats_source {
            stats.info = infos.next();
        }
        Ok(())
    }

    /// Structural pre-check: every source schema must equal the target's.
    ///
    /// Returns `(structurally_equal, order_key_sets_match)`.
    fn check_table_struct(&self) -> (bool, bool) {
        let target_info = self.target_table.schema_info();
        let mut equal = true;
        let mut keys_match = true;
        for source in &self.source_tables {
            let info = source.schema_info();
            if !info.structurally_equal(target_info) {
                warn!(
                    "table struct differs between source {} and target {}",
                    source.name(),
                    self.target_table.name()
                );
                equal = false;
            }
            if !info.same_order_key(target_info) {
                keys_match = false;
            }
        }
        (equal, keys_match)
    }

    async fn check_table_data(
        &self,
        config: &DiffConfig,
        cancel: &CancellationToken,
        sql_tx: mpsc::Sender<PatchMessage>,
    ) -> Result<bool> {
        let fingerprint = run_fingerprint(
            &self.source_tables,
            &self.target_table,
            self.stats_source.as_ref(),
            config,
        )?;
        let locator = self.target_table.locator();

        with_deadline(cancel, PERSIST_TIMEOUT, self.checkpoint.initialize()).await?;

        let mut from_checkpoint = false;
        let mut chunks = Vec::new();
        if config.use_checkpoint {
            chunks = with_deadline(
                cancel,
                PERSIST_TIMEOUT,
                self.checkpoint
                    .load_if_fingerprint_matches(locator, &fingerprint),
            )
            .await?;
            from_checkpoint = !chunks.is_empty();
        }

        if chunks.is_empty() {
            debug!("no usable checkpoint, splitting fresh chunks");
            with_deadline(cancel, PERSIST_TIMEOUT, self.checkpoint.clean(locator)).await?;
            with_deadline(
                cancel,
                PERSIST_TIMEOUT,
                self.checkpoint.init_summary(locator, &fingerprint),
            )
            .await?;

            let split_table = self.stats_source.as_ref().unwrap_or(&self.target_table);
            let req = SplitRequest {
                table: split_table,
                fields: &config.fields,
                range: &config.range,
                chunk_size: config.chunk_size,
                collation: &config.collation,
            };
            chunks = self.splitter.split(&req).await?;
        } else {
            info!(
                "resuming {} from checkpoint with {} chunks",
                self.target_table.name(),
                chunks.len()
            );
        }

        if chunks.is_empty() {
            warn!(
                "got 0 chunks, table {} is not checked",
                self.target_table.name()
            );
            return Ok(true);
        }

        let total = chunks.len();
        let worker_count = config.check_thread_count;
        let sample_first_pass = config.sample < 100 && !from_checkpoint;

        let ctx = Arc::new(RunContext {
            sources: self.source_tables.clone(),
            target: self.target_table.clone(),
            config: config.clone(),
            checkpoint: self.checkpoint.clone(),
            cancel: cancel.clone(),
            sql_tx,
        });

        let (result_tx, mut result_rx) = mpsc::channel(worker_count);
        let mut worker_txs = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let (tx, rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
            worker_txs.push(tx);
            tokio::spawn(check_worker(
                ctx.clone(),
                index,
                sample_first_pass,
                rx,
                result_tx.clone(),
            ));
        }
        drop(result_tx);

        // Stable affinity: chunk id modulo worker count, so resumed chunks
        // land on the same worker as before.
        let dispatch_cancel = cancel.clone();
        tokio::spawn(async move {
            for chunk in chunks {
                let index = chunk.id.rem_euclid(worker_count as i64) as usize;
                tokio::select! {
                    _ = dispatch_cancel.cancelled() => return,
                    sent = worker_txs[index].send(chunk) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            // Dropping the senders here closes the worker inputs.
        });

        let mut equal = true;
        let mut checked = 0usize;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("cancelled with {}/{} chunks checked", checked, total);
                    break;
                }
                report = result_rx.recv() => match report {
                    Some(chunk_equal) => {
                        checked += 1;
                        if !chunk_equal {
                            equal = false;
                        }
                        if checked == total {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }

        Ok(equal)
    }
}

/// Worker loop: receive chunks, verify, persist state, report equality.
async fn check_worker(
    ctx: Arc<RunContext>,
    index: usize,
    sample_first_pass: bool,
    mut chunks: mpsc::Receiver<ChunkRange>,
    results: mpsc::Sender<bool>,
) {
    let mut rng = match ctx.config.sample_seed {
        Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(index as u64)),
        None => StdRng::from_entropy(),
    };

    loop {
        let mut chunk = tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            chunk = chunks.recv() => match chunk {
                Some(chunk) => chunk,
                None => return,
            },
        };

        // Chunks already verified equal (or sampled out) in a previous run
        // report success without any I/O.
        if matches!(chunk.state, ChunkState::Success | ChunkState::Ignore) {
            if results.send(true).await.is_err() {
                return;
            }
            continue;
        }

        let report = match verify_chunk(&ctx, &mut chunk, sample_first_pass, &mut rng).await {
            Ok(chunk_equal) => {
                if !chunk_equal {
                    warn!("chunk data not equal: {}", chunk);
                }
                chunk_equal
            }
            Err(DiffError::Cancelled) => return,
            Err(err) => {
                error!("check chunk data failed: {}: {}", chunk, err);
                false
            }
        };

        if results.send(report).await.is_err() {
            return;
        }
    }
}

/// Verify one chunk and drive its state machine.
async fn verify_chunk(
    ctx: &RunContext,
    chunk: &mut ChunkRange,
    sample_first_pass: bool,
    rng: &mut StdRng,
) -> Result<bool> {
    // Sampling applies only to first-pass chunks; resumed chunks keep their
    // prior selection so checkpoint semantics stay deterministic.
    if sample_first_pass {
        let draw = rng.gen_range(0..100);
        if draw > ctx.config.sample {
            chunk.state = ChunkState::Ignore;
            persist_chunk(ctx, chunk).await;
            return Ok(true);
        }
    }

    chunk.state = ChunkState::Checking;
    persist_chunk(ctx, chunk).await;

    let result = check_chunk_data(ctx, chunk).await;
    match &result {
        Ok(true) => chunk.state = ChunkState::Success,
        Ok(false) => chunk.state = ChunkState::Failed,
        // Abandoned mid-chunk: leave `checking` so a restart re-runs it.
        Err(DiffError::Cancelled) => return result,
        Err(_) => chunk.state = ChunkState::Error,
    }
    persist_chunk(ctx, chunk).await;

    result
}

/// Two-tier equality check for one chunk.
async fn check_chunk_data(ctx: &RunContext, chunk: &ChunkRange) -> Result<bool> {
    if ctx.config.use_checksum {
        if compare_checksum(ctx, chunk).await? {
            return Ok(true);
        }
        if ctx.config.only_use_checksum {
            return Ok(false);
        }
    }

    info!(
        "checksum mismatch or disabled, selecting rows for {}: {}",
        ctx.target.name(),
        chunk
    );
    compare_rows(ctx, chunk).await
}

/// Coarse tier: XOR of the per-source checksums against the target checksum.
async fn compare_checksum(ctx: &RunContext, chunk: &ChunkRange) -> Result<bool> {
    let info = ctx.target.schema_info();

    let mut source_checksum = 0i64;
    for source in &ctx.sources {
        let req = ChecksumRequest {
            schema: &source.schema,
            table: &source.table,
            info,
            where_clause: &chunk.where_clause,
            args: &chunk.args,
            ignore_columns: &ctx.config.ignore_columns,
        };
        source_checksum ^=
            with_deadline(&ctx.cancel, BASE_TIMEOUT, source.handle.checksum(&req)).await?;
    }

    let req = ChecksumRequest {
        schema: &ctx.target.schema,
        table: &ctx.target.table,
        info,
        where_clause: &chunk.where_clause,
        args: &chunk.args,
        ignore_columns: &ctx.config.ignore_columns,
    };
    let target_checksum =
        with_deadline(&ctx.cancel, BASE_TIMEOUT, ctx.target.handle.checksum(&req)).await?;

    if source_checksum == target_checksum {
        debug!(
            "checksum is equal for {}: {} ({})",
            ctx.target.name(),
            chunk,
            source_checksum
        );
        return Ok(true);
    }

    warn!(
        "checksum is not equal for {}: {} (source {} target {})",
        ctx.target.name(),
        chunk,
        source_checksum,
        target_checksum
    );
    Ok(false)
}

/// Fine tier: k-way merge the source streams and diff against the target,
/// emitting fix-up DML. Does not return until the patch sink accepted every
/// emitted statement, so the chunk's final state is persisted only after the
/// caller durably received its patch.
async fn compare_rows(ctx: &RunContext, chunk: &ChunkRange) -> Result<bool> {
    let info = ctx.target.schema_info();
    let key_cols = info.order_key_columns();

    let scan = RowScan {
        schema: &ctx.target.schema,
        table: &ctx.target.table,
        info,
        where_clause: &chunk.where_clause,
        args: &chunk.args,
        ignore_columns: &ctx.config.ignore_columns,
        collation: &ctx.config.collation,
    };
    let target_rows =
        with_deadline(&ctx.cancel, BASE_TIMEOUT, ctx.target.handle.scan_rows(&scan)).await?;
    let target_keyed = keyed(target_rows, &key_cols, &ctx.target.name())?;

    let mut streams = Vec::with_capacity(ctx.sources.len());
    for source in &ctx.sources {
        let scan = RowScan {
            schema: &source.schema,
            table: &source.table,
            info,
            where_clause: &chunk.where_clause,
            args: &chunk.args,
            ignore_columns: &ctx.config.ignore_columns,
            collation: &ctx.config.collation,
        };
        let rows =
            with_deadline(&ctx.cancel, BASE_TIMEOUT, source.handle.scan_rows(&scan)).await?;
        streams.push(keyed(rows, &key_cols, &source.name())?);
    }
    let merged = merge_keyed(streams);

    let equal = diff_rows(
        merged,
        target_keyed,
        info,
        &key_cols,
        &ctx.target.schema,
        &ctx.target.table,
        &ctx.sql_tx,
    )
    .await?;

    // Wait until the sink accepted everything we queued.
    let (ack_tx, ack_rx) = oneshot::channel();
    ctx.sql_tx
        .send(PatchMessage::Flush(ack_tx))
        .await
        .map_err(|_| DiffError::Cancelled)?;
    ack_rx.await.map_err(|_| DiffError::Cancelled)?;

    Ok(equal)
}

/// Persist one chunk's state; failures are logged, the next save overwrites.
async fn persist_chunk(ctx: &RunContext, chunk: &ChunkRange) {
    match timeout(PERSIST_TIMEOUT, ctx.checkpoint.save_chunk(ctx.locator(), chunk)).await {
        Err(_) => warn!("saving chunk state timed out: {}", chunk),
        Ok(Err(err)) => warn!("saving chunk state failed: {}: {}", chunk, err),
        Ok(Ok(())) => {}
    }
}

/// Single consumer draining fix-up DML to the caller's writer.
async fn patch_sink<W>(
    mut rx: mpsc::Receiver<PatchMessage>,
    mut write_fix_sql: W,
    cancel: CancellationToken,
) where
    W: FnMut(&str) -> io::Result<()> + Send + 'static,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Drain what is already buffered, then stop.
                while let Ok(msg) = rx.try_recv() {
                    if let PatchMessage::Dml(sql) = msg {
                        write_dml(&mut write_fix_sql, &sql);
                    }
                }
                return;
            }
            msg = rx.recv() => match msg {
                Some(PatchMessage::Dml(sql)) => write_dml(&mut write_fix_sql, &sql),
                Some(PatchMessage::Flush(ack)) => {
                    let _ = ack.send(());
                }
                None => return,
            }
        }
    }
}

fn write_dml<W>(write_fix_sql: &mut W, sql: &str)
where
    W: FnMut(&str) -> io::Result<()>,
{
    if let Err(err) = write_fix_sql(&format!("{}\n", sql)) {
        error!("write fix sql failed: {}: {}", sql, err);
    }
}

/// Periodic summary refresh; runs once more on shutdown so the final
/// counters land.
async fn summary_ticker(
    checkpoint: Arc<dyn CheckpointStore>,
    instance_id: String,
    schema: String,
    table: String,
    mut stop_rx: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    let locator = TableLocator {
        instance_id: &instance_id,
        schema: &schema,
        table: &table,
    };

    let mut ticker = interval(SUMMARY_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => refresh_summary(checkpoint.as_ref(), locator).await,
        }
    }
    refresh_summary(checkpoint.as_ref(), locator).await;
}

async fn refresh_summary(checkpoint: &dyn CheckpointStore, locator: TableLocator<'_>) {
    match timeout(PERSIST_TIMEOUT, checkpoint.update_summary(locator)).await {
        Err(_) => warn!("summary update timed out for {}.{}", locator.schema, locator.table),
        Ok(Err(err)) => warn!(
            "summary update failed for {}.{}: {}",
            locator.schema, locator.table, err
        ),
        Ok(Ok(())) => {}
    }
}

/// Bound a fallible operation by the run's cancellation token and a deadline.
///
/// The select is biased towards cancellation so that a token cancelled before
/// or during the operation wins deterministically, even when the operation is
/// also ready on the first poll.
async fn with_deadline<T, F>(
    cancel: &CancellationToken,
    deadline: Duration,
    operation: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DiffError::Cancelled),
        finished = timeout(deadline, operation) => match finished {
            Ok(result) => result,
            Err(_) => Err(DiffError::Timeout(deadline)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryCheckpointStore;
    use crate::core::schema::{Column, TableSchema};
    use crate::splitter::FullTableSplitter;
    use crate::testutil::{
        collect_writer, row, table_ref, user, users_schema, FixedSplitter, MemoryTable,
    };

    const TARGET: TableLocator<'static> = TableLocator {
        instance_id: "target-1",
        schema: "shop",
        table: "users",
    };

    fn memory_table(rows: Vec<crate::core::value::RowRecord>) -> Arc<MemoryTable> {
        let table = Arc::new(MemoryTable::new(users_schema()));
        table.insert("TRUE", rows);
        table
    }

    fn diff_one(
        source: &Arc<MemoryTable>,
        target: &Arc<MemoryTable>,
        store: Arc<MemoryCheckpointStore>,
        config: DiffConfig,
    ) -> TableDiff {
        TableDiff::new(
            vec![table_ref(source, "source-1")],
            table_ref(target, "target-1"),
            store,
            Arc::new(FullTableSplitter),
            config,
        )
    }

    async fn run(diff: &mut TableDiff) -> (bool, bool, Vec<String>) {
        let (collected, writer) = collect_writer();
        let (struct_equal, data_equal) = diff
            .equal(CancellationToken::new(), writer)
            .await
            .expect("diff run");
        let sqls = collected.lock().unwrap().clone();
        (struct_equal, data_equal, sqls)
    }

    #[tokio::test]
    async fn test_identical_tables_are_equal() {
        let source = memory_table(vec![user(1, "a"), user(2, "b"), user(3, "c")]);
        let target = memory_table(vec![user(1, "a"), user(2, "b"), user(3, "c")]);
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut diff = diff_one(&source, &target, store.clone(), DiffConfig::default());

        let (struct_equal, data_equal, sqls) = run(&mut diff).await;
        assert!(struct_equal);
        assert!(data_equal);
        assert!(sqls.is_empty());
        // The checksum tier resolved the chunk without materializing rows.
        assert_eq!(target.scan_count(), 0);
        assert_eq!(store.chunk_states(TARGET), vec![(0, ChunkState::Success)]);
    }

    #[tokio::test]
    async fn test_updated_row_emits_replace() {
        let source = memory_table(vec![user(1, "a"), user(2, "b"), user(3, "c")]);
        let target = memory_table(vec![user(1, "a"), user(2, "B"), user(3, "c")]);
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut diff = diff_one(&source, &target, store.clone(), DiffConfig::default());

        let (struct_equal, data_equal, sqls) = run(&mut diff).await;
        assert!(struct_equal);
        assert!(!data_equal);
        assert_eq!(
            sqls,
            vec!["REPLACE INTO `shop`.`users`(`id`,`name`) VALUES (2,'b');"]
        );
        assert_eq!(store.chunk_states(TARGET), vec![(0, ChunkState::Failed)]);
    }

    #[tokio::test]
    async fn test_extra_target_row_emits_delete() {
        let source = memory_table(vec![user(1, "a"), user(2, "b"), user(3, "c")]);
        let target = memory_table(vec![user(1, "a"), user(2, "b"), user(3, "c"), user(4, "d")]);
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut diff = diff_one(&source, &target, store, DiffConfig::default());

        let (_, data_equal, sqls) = run(&mut diff).await;
        assert!(!data_equal);
        assert_eq!(sqls, vec!["DELETE FROM `shop`.`users` WHERE `id` = 4;"]);
    }

    #[tokio::test]
    async fn test_two_sources_merge_into_empty_target() {
        let s1 = memory_table(vec![user(1, "a"), user(3, "c")]);
        let s2 = memory_table(vec![user(2, "b"), user(4, "d")]);
        let target = memory_table(vec![]);
        let mut diff = TableDiff::new(
            vec![table_ref(&s1, "source-1"), table_ref(&s2, "source-2")],
            table_ref(&target, "target-1"),
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(FullTableSplitter),
            DiffConfig::default(),
        );

        let (_, data_equal, sqls) = run(&mut diff).await;
        assert!(!data_equal);
        assert_eq!(
            sqls,
            vec![
                "REPLACE INTO `shop`.`users`(`id`,`name`) VALUES (1,'a');",
                "REPLACE INTO `shop`.`users`(`id`,`name`) VALUES (2,'b');",
                "REPLACE INTO `shop`.`users`(`id`,`name`) VALUES (3,'c');",
                "REPLACE INTO `shop`.`users`(`id`,`name`) VALUES (4,'d');",
            ]
        );
    }

    #[tokio::test]
    async fn test_checksum_only_mode_emits_no_dml() {
        let source = memory_table(vec![user(1, "a"), user(2, "b")]);
        let target = memory_table(vec![user(1, "a"), user(2, "X")]);
        let store = Arc::new(MemoryCheckpointStore::new());
        let config = DiffConfig {
            only_use_checksum: true,
            ..DiffConfig::default()
        };
        let mut diff = diff_one(&source, &target, store.clone(), config);

        let (_, data_equal, sqls) = run(&mut diff).await;
        assert!(!data_equal);
        assert!(sqls.is_empty());
        assert_eq!(target.scan_count(), 0);
        assert_eq!(store.chunk_states(TARGET), vec![(0, ChunkState::Failed)]);
    }

    #[tokio::test]
    async fn test_struct_mismatch_still_checks_data() {
        let source = Arc::new(MemoryTable::new(TableSchema::new(
            vec![
                Column::new("id", "int", false),
                Column::new("name", "text", true),
            ],
            vec!["id".into()],
        )));
        source.insert("TRUE", vec![user(1, "a")]);
        let target = memory_table(vec![user(1, "a")]);
        let mut diff = diff_one(
            &source,
            &target,
            Arc::new(MemoryCheckpointStore::new()),
            DiffConfig::default(),
        );

        let (struct_equal, data_equal, sqls) = run(&mut diff).await;
        assert!(!struct_equal);
        // Same order key, same data: the data phase still runs and passes.
        assert!(data_equal);
        assert!(sqls.is_empty());
    }

    #[tokio::test]
    async fn test_order_key_mismatch_skips_data_phase() {
        let source = Arc::new(MemoryTable::new(TableSchema::new(
            vec![
                Column::new("id", "int", false),
                Column::new("name", "varchar", true),
            ],
            vec!["id".into(), "name".into()],
        )));
        source.insert("TRUE", vec![user(1, "a")]);
        let target = memory_table(vec![user(1, "a")]);
        let mut diff = diff_one(
            &source,
            &target,
            Arc::new(MemoryCheckpointStore::new()),
            DiffConfig::default(),
        );

        let (struct_equal, data_equal, sqls) = run(&mut diff).await;
        assert!(!struct_equal);
        assert!(!data_equal);
        assert!(sqls.is_empty());
        assert_eq!(target.checksum_count(), 0);
        assert_eq!(target.scan_count(), 0);
    }

    fn two_chunk_fixture() -> (Arc<MemoryTable>, Arc<MemoryTable>, Vec<ChunkRange>) {
        let source = Arc::new(MemoryTable::new(users_schema()));
        source.insert("`id` <= 2", vec![user(1, "a"), user(2, "b")]);
        source.insert("`id` > 2", vec![user(3, "c")]);
        let target = Arc::new(MemoryTable::new(users_schema()));
        target.insert("`id` <= 2", vec![user(1, "a"), user(2, "b")]);
        target.insert("`id` > 2", vec![user(3, "stale")]);
        let chunks = vec![
            ChunkRange::new(0, "`id` <= 2", vec![]),
            ChunkRange::new(1, "`id` > 2", vec![]),
        ];
        (source, target, chunks)
    }

    #[tokio::test]
    async fn test_resume_skips_terminal_chunks() {
        let (source, target, chunks) = two_chunk_fixture();
        let store = Arc::new(MemoryCheckpointStore::new());
        let config = DiffConfig {
            use_checkpoint: true,
            ..DiffConfig::default()
        };
        let mut diff = TableDiff::new(
            vec![table_ref(&source, "source-1")],
            table_ref(&target, "target-1"),
            store.clone(),
            Arc::new(FixedSplitter(chunks)),
            config,
        );

        let (_, data_equal, first_sqls) = run(&mut diff).await;
        assert!(!data_equal);
        assert_eq!(
            first_sqls,
            vec!["REPLACE INTO `shop`.`users`(`id`,`name`) VALUES (3,'c');"]
        );
        assert_eq!(
            store.chunk_states(TARGET),
            vec![(0, ChunkState::Success), (1, ChunkState::Failed)]
        );
        let summary = store.summary(TARGET).unwrap();
        assert_eq!(summary.total_chunks, 2);
        assert_eq!(summary.checked_chunks, 2);
        assert_eq!(summary.state, "failed");
        let scans_after_first = target.scan_count();

        // Restart with the same configuration: the successful chunk is
        // skipped without I/O, the failed one re-verifies and re-emits the
        // identical patch.
        let (_, data_equal, second_sqls) = run(&mut diff).await;
        assert!(!data_equal);
        assert_eq!(second_sqls, first_sqls);
        assert_eq!(target.scan_count(), scans_after_first + 1);
        assert_eq!(
            store.chunk_states(TARGET),
            vec![(0, ChunkState::Success), (1, ChunkState::Failed)]
        );
    }

    #[tokio::test]
    async fn test_fingerprint_change_discards_checkpoint() {
        let (source, target, chunks) = two_chunk_fixture();
        target.insert("`id` > 2", vec![user(3, "c")]);
        let store = Arc::new(MemoryCheckpointStore::new());
        let config = DiffConfig {
            use_checkpoint: true,
            ..DiffConfig::default()
        };
        let mut diff = TableDiff::new(
            vec![table_ref(&source, "source-1")],
            table_ref(&target, "target-1"),
            store.clone(),
            Arc::new(FixedSplitter(chunks)),
            config,
        );

        let (_, data_equal, _) = run(&mut diff).await;
        assert!(data_equal);
        let checksums_after_first = target.checksum_count();
        assert_eq!(checksums_after_first, 2);

        // Any fingerprinted field change invalidates the prior chunks.
        diff.config.chunk_size = 50;
        let (_, data_equal, _) = run(&mut diff).await;
        assert!(data_equal);
        assert_eq!(target.checksum_count(), checksums_after_first + 2);
    }

    #[tokio::test]
    async fn test_without_checkpoint_every_run_reverifies() {
        let source = memory_table(vec![user(1, "a")]);
        let target = memory_table(vec![user(1, "a")]);
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut diff = diff_one(&source, &target, store, DiffConfig::default());

        run(&mut diff).await;
        let after_first = target.checksum_count();
        run(&mut diff).await;
        assert_eq!(target.checksum_count(), after_first * 2);
    }

    #[tokio::test]
    async fn test_sampling_ignores_chunks_on_first_pass_only() {
        let chunks: Vec<ChunkRange> = (0..20)
            .map(|id| ChunkRange::new(id, format!("`id` = {}", id), vec![]))
            .collect();
        let source = Arc::new(MemoryTable::new(users_schema()));
        let target = Arc::new(MemoryTable::new(users_schema()));
        let store = Arc::new(MemoryCheckpointStore::new());
        let config = DiffConfig {
            sample: 1,
            sample_seed: Some(42),
            use_checkpoint: true,
            ..DiffConfig::default()
        };
        let mut diff = TableDiff::new(
            vec![table_ref(&source, "source-1")],
            table_ref(&target, "target-1"),
            store.clone(),
            Arc::new(FixedSplitter(chunks)),
            config,
        );

        let (_, data_equal, sqls) = run(&mut diff).await;
        assert!(data_equal);
        assert!(sqls.is_empty());

        let states = store.chunk_states(TARGET);
        assert_eq!(states.len(), 20);
        let ignored = states
            .iter()
            .filter(|(_, state)| *state == ChunkState::Ignore)
            .count();
        assert!(ignored >= 10, "expected most chunks ignored, got {ignored}");

        // Resume: terminal chunks are skipped, no chunk changes selection.
        let checksums_after_first = target.checksum_count();
        let (_, data_equal, _) = run(&mut diff).await;
        assert!(data_equal);
        assert_eq!(store.chunk_states(TARGET), states);
        assert_eq!(target.checksum_count(), checksums_after_first);
    }

    #[tokio::test]
    async fn test_ignored_columns_do_not_affect_equality() {
        let source = memory_table(vec![user(1, "a")]);
        let target = memory_table(vec![user(1, "DIFFERENT")]);
        let config = DiffConfig {
            use_checksum: false,
            ignore_columns: vec!["name".to_string()],
            ..DiffConfig::default()
        };
        let mut diff = diff_one(
            &source,
            &target,
            Arc::new(MemoryCheckpointStore::new()),
            config,
        );

        let (_, data_equal, sqls) = run(&mut diff).await;
        assert!(data_equal);
        assert!(sqls.is_empty());
    }

    #[tokio::test]
    async fn test_null_and_value_differ() {
        let source = memory_table(vec![row(&[("id", Some("2")), ("name", None)])]);
        let target = memory_table(vec![user(2, "b")]);
        let mut diff = diff_one(
            &source,
            &target,
            Arc::new(MemoryCheckpointStore::new()),
            DiffConfig::default(),
        );

        let (_, data_equal, sqls) = run(&mut diff).await;
        assert!(!data_equal);
        assert_eq!(
            sqls,
            vec!["REPLACE INTO `shop`.`users`(`id`,`name`) VALUES (2,NULL);"]
        );
    }

    #[tokio::test]
    async fn test_zero_chunks_reports_equal() {
        let source = memory_table(vec![user(1, "a")]);
        let target = memory_table(vec![]);
        let mut diff = TableDiff::new(
            vec![table_ref(&source, "source-1")],
            table_ref(&target, "target-1"),
            Arc::new(MemoryCheckpointStore::new()),
            Arc::new(FixedSplitter(Vec::new())),
            DiffConfig::default(),
        );

        let (_, data_equal, sqls) = run(&mut diff).await;
        assert!(data_equal);
        assert!(sqls.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_surfaces_cancellation() {
        let source = memory_table(vec![user(1, "a")]);
        let target = memory_table(vec![user(1, "a")]);
        let mut diff = diff_one(
            &source,
            &target,
            Arc::new(MemoryCheckpointStore::new()),
            DiffConfig::default(),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let (_, writer) = collect_writer();
        let err = diff.equal(cancel, writer).await.unwrap_err();
        assert!(matches!(err, DiffError::Cancelled));
    }

    #[tokio::test]
    async fn test_dml_is_deterministic_across_runs() {
        let (source, target, chunks) = two_chunk_fixture();
        target.insert("`id` <= 2", vec![user(1, "a"), user(2, "OLD")]);
        let make = |store: Arc<MemoryCheckpointStore>| {
            TableDiff::new(
                vec![table_ref(&source, "source-1")],
                table_ref(&target, "target-1"),
                store,
                Arc::new(FixedSplitter(chunks.clone())),
                DiffConfig::default(),
            )
        };

        let (_, _, mut first) = run(&mut make(Arc::new(MemoryCheckpointStore::new()))).await;
        let (_, _, mut second) = run(&mut make(Arc::new(MemoryCheckpointStore::new()))).await;
        // Cross-chunk interleaving is unspecified; compare as multisets.
        first.sort();
        second.sort();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn test_applying_patch_then_rediff_is_clean() {
        let source = memory_table(vec![user(1, "a"), user(2, "b"), user(3, "c")]);
        let target = memory_table(vec![user(1, "a"), user(2, "B"), user(4, "d")]);
        let mut diff = diff_one(
            &source,
            &target,
            Arc::new(MemoryCheckpointStore::new()),
            DiffConfig::default(),
        );

        let (_, data_equal, sqls) = run(&mut diff).await;
        assert!(!data_equal);
        assert!(!sqls.is_empty());

        // Apply the patch's net effect: REPLACE (2,'b'), REPLACE (3,'c'),
        // DELETE id 4. The target now holds exactly the source rows.
        target.insert("TRUE", vec![user(1, "a"), user(2, "b"), user(3, "c")]);

        let (_, data_equal, sqls) = run(&mut diff).await;
        assert!(data_equal);
        assert!(sqls.is_empty());
    }

    #[tokio::test]
    async fn test_merged_sources_equal_union_for_any_source_count() {
        for sources_count in 1..=4usize {
            let sources: Vec<Arc<MemoryTable>> = (0..sources_count)
                .map(|stripe| {
                    memory_table(
                        (0..8)
                            .filter(|id| (*id as usize) % sources_count == stripe)
                            .map(|id| user(id + 1, &format!("name-{}", id + 1)))
                            .collect(),
                    )
                })
                .collect();
            let target = memory_table(vec![]);
            let config = DiffConfig {
                use_checksum: false,
                ..DiffConfig::default()
            };
            let mut diff = TableDiff::new(
                sources
                    .iter()
                    .enumerate()
                    .map(|(i, s)| table_ref(s, &format!("source-{}", i)))
                    .collect(),
                table_ref(&target, "target-1"),
                Arc::new(MemoryCheckpointStore::new()),
                Arc::new(FullTableSplitter),
                config,
            );

            let (_, data_equal, sqls) = run(&mut diff).await;
            assert!(!data_equal);
            let expected: Vec<String> = (1..=8)
                .map(|id| {
                    format!(
                        "REPLACE INTO `shop`.`users`(`id`,`name`) VALUES ({},'name-{}');",
                        id, id
                    )
                })
                .collect();
            assert_eq!(sqls, expected, "with {} sources", sources_count);
        }
    }
}
