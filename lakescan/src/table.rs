use crate::analysis::QueryAnalysis;
use crate::discovery::{PartitionDiscovery, detect_strategy};
use crate::discovery::delta::DEFAULT_DELTA_LOG_TTL;
use crate::error::Result;
use crate::expr::Expr;
use crate::index::IndexedColumnEngine;
use crate::metadata::{self, RowType, TypeMetadata};
use crate::reader::{ObjectStoreParquetReader, ParquetReader};
use crate::scan::{ScanContext, scan_stream};
use crate::stats::StatisticsEnricher;
use crate::store::blob_cache::{BlobCache, BlobCacheConfig};
use futures::TryStreamExt;
use futures::stream::BoxStream;
use object_store::{ObjectStore, path::Path};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;

/// Shape of the result set when a query projects partition fields only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionProjectionMode {
    /// One row per data file: a multi-file partition is observed once per
    /// file, matching the underlying add-action semantics.
    #[default]
    PerFile,
    /// One row per partition, for consumers that only want the key space.
    PerPartition,
}

/// Per-table configuration. The `Default` impl carries the process-wide
/// defaults; every field can be overridden per table.
#[derive(Debug, Clone)]
pub struct TableConfig {
    pub blob_cache: BlobCacheConfig,
    /// Bounded degree of parallel footer reads during statistics
    /// enrichment. Defaults to the CPU count.
    pub enrich_parallelism: usize,
    /// Freshness window of the cached Delta-log snapshot.
    pub delta_log_ttl: Duration,
    pub partition_projection: PartitionProjectionMode,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            blob_cache: BlobCacheConfig::default(),
            enrich_parallelism: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(8),
            delta_log_ttl: DEFAULT_DELTA_LOG_TTL,
            partition_projection: PartitionProjectionMode::default(),
        }
    }
}

/// A typed handle over one partitioned parquet table.
///
/// The handle exclusively owns the reader, the discovery strategy, and
/// every cache; dropping it aborts outstanding background work. Scans
/// borrow nothing from the handle, so streams may outlive individual
/// method calls.
pub struct Table<T: RowType> {
    metadata: &'static TypeMetadata,
    root: Path,
    config: TableConfig,
    blob_cache: Arc<BlobCache>,
    reader: Arc<dyn ParquetReader>,
    discovery: Arc<dyn PartitionDiscovery>,
    enricher: Arc<StatisticsEnricher>,
    index: Arc<IndexedColumnEngine>,
    background: Arc<Mutex<Vec<AbortHandle>>>,
    _row_type: PhantomData<fn() -> T>,
}

impl<T: RowType> std::fmt::Debug for Table<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("row_type", &self.metadata.type_name)
            .field("root", &self.root.to_string())
            .field("discovery", &self.discovery)
            .field("blob_cache", &self.blob_cache)
            .finish()
    }
}

impl<T: RowType> Table<T> {
    /// Opens a table rooted at `root` with default configuration. The row
    /// type must have been registered; an unregistered type fails with
    /// `NoMetadata`.
    pub async fn open(store: Arc<dyn ObjectStore>, root: Path) -> Result<Self> {
        Self::open_with_config(store, root, TableConfig::default()).await
    }

    /// Opens a table, detecting the physical layout: a populated
    /// `_delta_log/` prefix selects Delta discovery, anything else walks
    /// Hive directories.
    pub async fn open_with_config(
        store: Arc<dyn ObjectStore>,
        root: Path,
        config: TableConfig,
    ) -> Result<Self> {
        let metadata = metadata::metadata_of::<T>()?;
        let discovery =
            detect_strategy(Arc::clone(&store), root.clone(), config.delta_log_ttl).await?;
        Ok(Self::assemble(store, root, config, metadata, discovery))
    }

    /// Opens a table with an explicit discovery strategy, bypassing
    /// layout detection.
    pub fn open_with_discovery(
        store: Arc<dyn ObjectStore>,
        root: Path,
        config: TableConfig,
        discovery: Arc<dyn PartitionDiscovery>,
    ) -> Result<Self> {
        let metadata = metadata::metadata_of::<T>()?;
        Ok(Self::assemble(store, root, config, metadata, discovery))
    }

    fn assemble(
        store: Arc<dyn ObjectStore>,
        root: Path,
        config: TableConfig,
        metadata: &'static TypeMetadata,
        discovery: Arc<dyn PartitionDiscovery>,
    ) -> Self {
        let blob_cache = Arc::new(BlobCache::new(
            Arc::clone(&store),
            config.blob_cache.clone(),
        ));
        let reader: Arc<dyn ParquetReader> =
            Arc::new(ObjectStoreParquetReader::new(Arc::clone(&blob_cache)));
        let enricher = Arc::new(StatisticsEnricher::new(
            store,
            Arc::clone(&reader),
            config.enrich_parallelism,
        ));
        let index = Arc::new(IndexedColumnEngine::new(Arc::clone(&reader)));
        Self {
            metadata,
            root,
            config,
            blob_cache,
            reader,
            discovery,
            enricher,
            index,
            background: Arc::new(Mutex::new(Vec::new())),
            _row_type: PhantomData,
        }
    }

    /// Swaps the parquet reader, keeping everything else. Intended for
    /// instrumented readers in tests.
    pub fn with_reader(mut self, reader: Arc<dyn ParquetReader>) -> Self {
        self.enricher = Arc::new(StatisticsEnricher::new(
            Arc::clone(self.blob_cache.store()),
            Arc::clone(&reader),
            self.config.enrich_parallelism,
        ));
        self.index = Arc::new(IndexedColumnEngine::new(Arc::clone(&reader)));
        self.reader = reader;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn blob_cache(&self) -> &Arc<BlobCache> {
        &self.blob_cache
    }

    /// Streams rows matching the filter, in (partition, file, row-group,
    /// row) order. Analysis failures (unknown fields, non-string prefix
    /// matches) surface before the first poll.
    pub fn scan(&self, filter: Option<Expr>) -> Result<BoxStream<'static, Result<T>>> {
        let analysis = QueryAnalysis::analyze(self.metadata, filter.as_ref())?;
        Ok(scan_stream(self.scan_context(), analysis))
    }

    /// Collects a whole scan into memory.
    pub async fn collect(&self, filter: Option<Expr>) -> Result<Vec<T>> {
        self.scan(filter)?.try_collect().await
    }

    fn scan_context(&self) -> ScanContext {
        ScanContext {
            metadata: self.metadata,
            discovery: Arc::clone(&self.discovery),
            enricher: Arc::clone(&self.enricher),
            reader: Arc::clone(&self.reader),
            index: Arc::clone(&self.index),
            projection_mode: self.config.partition_projection,
            background: Arc::clone(&self.background),
        }
    }

    /// Drops the cached discovery snapshot so the next scan re-reads the
    /// layout.
    pub fn clear_partition_cache(&self) {
        self.discovery.clear_cache();
    }

    /// Drops every cached sorted column index.
    pub fn clear_index_cache(&self) {
        self.index.clear_cache();
    }
}

impl<T: RowType> Drop for Table<T> {
    fn drop(&mut self) {
        let background = self.background.lock().expect("background task list poisoned");
        for task in background.iter() {
            task.abort();
        }
    }
}
