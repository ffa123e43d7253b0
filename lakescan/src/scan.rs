use crate::analysis::QueryAnalysis;
use crate::discovery::PartitionDiscovery;
use crate::error::Result;
use crate::index::IndexedColumnEngine;
use crate::metadata::{RowType, TypeMetadata};
use crate::partition::ParquetFile;
use crate::prune::{allowed_row_groups_by_stats, prune_files, prune_partitions};
use crate::reader::ParquetReader;
use crate::row::{RowBatch, evaluate_predicate};
use crate::stats::StatisticsEnricher;
use crate::table::PartitionProjectionMode;
use async_stream::try_stream;
use futures::StreamExt;
use futures::stream::BoxStream;
use log::debug;
use std::sync::{Arc, Mutex};
use tokio::task::AbortHandle;

/// Everything the enumeration pipeline borrows from the table handle.
#[derive(Clone)]
pub(crate) struct ScanContext {
    pub metadata: &'static TypeMetadata,
    pub discovery: Arc<dyn PartitionDiscovery>,
    pub enricher: Arc<StatisticsEnricher>,
    pub reader: Arc<dyn ParquetReader>,
    pub index: Arc<IndexedColumnEngine>,
    pub projection_mode: PartitionProjectionMode,
    /// Prefetch tasks spawned by scans, aborted when the handle drops.
    pub background: Arc<Mutex<Vec<AbortHandle>>>,
}

/// Aborts the wrapped prefetch task when the consumer drops the scan
/// stream mid-flight.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// The consumer-driven enumeration pipeline.
///
/// The returned stream is single-threaded cooperative: each poll advances
/// discovery, pruning, reading, and materialization as far as the next
/// row. Enrichment, prefetch, and index builds fan out internally under
/// bounded pools; rows come out in (partition, file, row-group, row)
/// order.
pub(crate) fn scan_stream<T: RowType>(
    ctx: ScanContext,
    analysis: QueryAnalysis,
) -> BoxStream<'static, Result<T>> {
    let stream = try_stream! {
        if analysis.provably_empty {
            debug!("scan_short_circuit reason=contradictory_bounds");
            return;
        }
        let mut partitions = ctx.discovery.discover().await?;
        if partitions.is_empty() {
            return;
        }
        partitions = prune_partitions(partitions, &analysis.partition_filters);
        debug!("scan_partitions surviving={}", partitions.len());

        // a projection of partition fields only never opens a data file
        if analysis.partition_only_projection(ctx.metadata) {
            for partition in &partitions {
                let values = Arc::new(partition.values.clone());
                let rows = match ctx.projection_mode {
                    PartitionProjectionMode::PerFile => partition.files.len(),
                    PartitionProjectionMode::PerPartition => 1,
                };
                let batch = RowBatch::partition_only(rows, values, ctx.metadata);
                for row_index in 0..batch.num_rows() {
                    let row = batch.row(row_index);
                    if passes_residuals(&analysis, &row)? {
                        yield T::from_row(&row)?;
                    }
                }
            }
            return;
        }

        if analysis.has_range_filters() {
            ctx.enricher.enrich_partitions(&mut partitions).await;
            partitions = prune_files(partitions, &analysis.range_filters);
        }
        if partitions.is_empty() {
            return;
        }

        let _prefetch = spawn_prefetch(&ctx, &partitions);

        let columns: Vec<String> = analysis.columns_to_read(ctx.metadata).into_iter().collect();

        for partition in partitions {
            let partition_values = Arc::new(partition.values.clone());
            for file in &partition.files {
                let by_stats = allowed_row_groups_by_stats(file, &analysis.range_filters);
                let by_index = ctx
                    .index
                    .allowed_row_groups(file, &analysis.indexed, ctx.metadata)
                    .await?;
                let row_groups: Option<Vec<usize>> = match (by_stats, by_index) {
                    (None, None) => None,
                    (Some(stats), None) => Some(stats),
                    (None, Some(index)) => Some(index.into_iter().collect()),
                    (Some(stats), Some(index)) => {
                        Some(stats.into_iter().filter(|g| index.contains(g)).collect())
                    }
                };
                if row_groups.as_ref().is_some_and(|groups| groups.is_empty()) {
                    debug!("scan_skip_file file={} reason=no_row_groups", file.path);
                    continue;
                }
                let mut batches = ctx.reader.read_rows(file, &columns, row_groups).await?;
                while let Some(batch) = batches.next().await {
                    let batch = RowBatch::new(batch?, Arc::clone(&partition_values), ctx.metadata);
                    for row_index in 0..batch.num_rows() {
                        let row = batch.row(row_index);
                        if passes_residuals(&analysis, &row)? {
                            yield T::from_row(&row)?;
                        }
                    }
                }
            }
        }
    };
    stream.boxed()
}

fn passes_residuals(analysis: &QueryAnalysis, row: &crate::row::RowView<'_>) -> Result<bool> {
    for residual in &analysis.residuals {
        if !evaluate_predicate(residual, row)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Fire-and-forget cache warm-up for every surviving file. The task is
/// aborted when the scan stream or the table handle goes away; its
/// errors are swallowed because on-demand reads still work.
fn spawn_prefetch(ctx: &ScanContext, partitions: &[crate::partition::Partition]) -> AbortOnDrop {
    let files: Vec<ParquetFile> = partitions
        .iter()
        .flat_map(|partition| partition.files.iter().cloned())
        .collect();
    let reader = Arc::clone(&ctx.reader);
    let handle = tokio::spawn(async move {
        reader.prefetch(files).await;
    });
    let mut background = ctx.background.lock().expect("background task list poisoned");
    background.retain(|task| !task.is_finished());
    background.push(handle.abort_handle());
    AbortOnDrop(handle)
}
