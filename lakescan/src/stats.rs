use crate::error::{Error, Result};
use crate::partition::{ColumnStatistics, ParquetFile, Partition, RowGroupInfo};
use crate::reader::ParquetReader;
use bytes::Bytes;
use futures::StreamExt;
use log::warn;
use moka::future::Cache;
use object_store::{ObjectStore, path::Path};
use std::collections::HashMap;
use std::sync::Arc;

/// Default entries kept per handle; statistics are tiny compared to blob
/// contents so the cache is entry-bounded, not byte-bounded.
const DEFAULT_STATS_CACHE_ENTRIES: u64 = 64 * 1024;

/// Everything the enricher extracts from one footer.
#[derive(Debug, Clone)]
struct FileStatistics {
    size_bytes: u64,
    row_count: u64,
    row_groups: Vec<RowGroupInfo>,
}

/// Fills file sizes, row counts, and per-row-group raw min/max statistics
/// on discovered files.
///
/// Runs bounded-parallel per file and memoizes per path for the lifetime
/// of the table handle. A file whose footer cannot be read stays
/// unenriched; pruning treats it as "unknown, may match".
pub struct StatisticsEnricher {
    store: Arc<dyn ObjectStore>,
    reader: Arc<dyn ParquetReader>,
    cache: Cache<String, Arc<FileStatistics>>,
    parallelism: usize,
}

impl std::fmt::Debug for StatisticsEnricher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticsEnricher")
            .field("cached_files", &self.cache.entry_count())
            .field("parallelism", &self.parallelism)
            .finish()
    }
}

impl StatisticsEnricher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        reader: Arc<dyn ParquetReader>,
        parallelism: usize,
    ) -> Self {
        Self {
            store,
            reader,
            cache: Cache::new(DEFAULT_STATS_CACHE_ENTRIES),
            parallelism: parallelism.max(1),
        }
    }

    /// Enriches every file of the given partitions, in place. Per-file
    /// failures are logged and leave that file without statistics.
    pub async fn enrich_partitions(&self, partitions: &mut [Partition]) {
        let mut jobs = Vec::new();
        for (partition_index, partition) in partitions.iter().enumerate() {
            for (file_index, file) in partition.files.iter().enumerate() {
                jobs.push((partition_index, file_index, file.clone()));
            }
        }
        let results: Vec<_> = futures::stream::iter(jobs.into_iter().map(
            |(partition_index, file_index, file)| async move {
                let stats = self.enrich_file(&file).await;
                (partition_index, file_index, file.path, stats)
            },
        ))
        .buffer_unordered(self.parallelism)
        .collect()
        .await;

        for (partition_index, file_index, path, stats) in results {
            match stats {
                Ok(stats) => {
                    let file = &mut partitions[partition_index].files[file_index];
                    file.size_bytes = Some(stats.size_bytes);
                    file.row_count = Some(stats.row_count);
                    file.row_groups = stats.row_groups.clone();
                }
                Err(e) => warn!("statistics unavailable for {path}: {e}"),
            }
        }
    }

    async fn enrich_file(&self, file: &ParquetFile) -> Result<Arc<FileStatistics>> {
        let reader = Arc::clone(&self.reader);
        let store = Arc::clone(&self.store);
        let file = file.clone();
        self.cache
            .try_get_with(file.path.clone(), async move {
                let size_bytes = match file.size_bytes {
                    Some(size) => size,
                    None => store.head(&Path::from(file.path.as_str())).await?.size,
                };
                let metadata = reader.file_metadata(&file).await?;
                let row_groups = metadata
                    .row_groups()
                    .iter()
                    .enumerate()
                    .map(|(index, group)| {
                        let mut column_stats = HashMap::new();
                        for column in group.columns() {
                            let descr = column.column_descr();
                            let stats = column.statistics();
                            column_stats.insert(
                                descr.path().string(),
                                ColumnStatistics {
                                    physical: column.column_type(),
                                    logical: descr.logical_type(),
                                    min_raw: stats
                                        .and_then(|s| s.min_bytes_opt())
                                        .map(Bytes::copy_from_slice),
                                    max_raw: stats
                                        .and_then(|s| s.max_bytes_opt())
                                        .map(Bytes::copy_from_slice),
                                    null_count: stats.and_then(|s| s.null_count_opt()),
                                    distinct_count: stats.and_then(|s| s.distinct_count_opt()),
                                },
                            );
                        }
                        RowGroupInfo {
                            index,
                            num_rows: Some(group.num_rows() as u64),
                            total_byte_size: Some(group.total_byte_size() as u64),
                            column_stats,
                        }
                    })
                    .collect();
                Ok::<_, Error>(Arc::new(FileStatistics {
                    size_bytes,
                    row_count: metadata.file_metadata().num_rows() as u64,
                    row_groups,
                }))
            })
            .await
            .map_err(|e: Arc<Error>| (*e).clone())
    }
}
