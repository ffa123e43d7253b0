use crate::error::{Error, Result};
use crate::partition::ParquetFile;
use crate::row::array_scalar;
use crate::scalar::Scalar;
use crate::store::blob_cache::BlobCache;
use crate::store::caching_reader::CachingReader;
use arrow::array::RecordBatch;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use log::debug;
use moka::future::Cache;
use object_store::path::Path;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::{ArrowReaderMetadata, ArrowReaderOptions};
use parquet::arrow::async_reader::{AsyncFileReader, ParquetRecordBatchStreamBuilder};
use parquet::basic::{LogicalType, Type as PhysicalType};
use parquet::file::metadata::ParquetMetaData;
use std::sync::Arc;

/// Default footer metadata cache budget (10 MB)
const DEFAULT_METADATA_CACHE_BYTES: u64 = 10 * 1024 * 1024;

/// Schema entry of one leaf column.
#[derive(Debug, Clone)]
pub struct ColumnMeta {
    pub path: String,
    pub physical: PhysicalType,
    pub logical: Option<LogicalType>,
    pub nullable: bool,
}

pub type BatchStream = BoxStream<'static, Result<RecordBatch>>;

/// Read access to parquet files: schema, projected batch streams over a
/// row-group subset, raw column values for index building, and prefetch.
#[async_trait]
pub trait ParquetReader: Send + Sync + std::fmt::Debug {
    async fn get_columns(&self, file: &ParquetFile) -> Result<Vec<ColumnMeta>>;

    /// Streams batches of the projected columns. When `row_groups` is
    /// given, only those groups are touched; absent means all of them.
    async fn read_rows(
        &self,
        file: &ParquetFile,
        columns: &[String],
        row_groups: Option<Vec<usize>>,
    ) -> Result<BatchStream>;

    /// Values of one column, per row group, for index construction.
    async fn read_column_values_by_row_group(
        &self,
        file: &ParquetFile,
        column: &str,
    ) -> Result<Vec<Vec<Option<Scalar>>>>;

    /// Footer metadata, memoized per file path.
    async fn file_metadata(&self, file: &ParquetFile) -> Result<Arc<ParquetMetaData>>;

    /// Warms whatever layer benefits from it. Errors never surface;
    /// on-demand reads re-raise them.
    async fn prefetch(&self, _files: Vec<ParquetFile>) {}
}

/// [`ParquetReader`] over an object store, reading through the shared
/// [`BlobCache`] and memoizing footer metadata per path.
pub struct ObjectStoreParquetReader {
    blob_cache: Arc<BlobCache>,
    metadata_cache: Cache<String, Arc<ParquetMetaData>>,
}

impl std::fmt::Debug for ObjectStoreParquetReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreParquetReader")
            .field("blob_cache", &self.blob_cache)
            .field("cached_footers", &self.metadata_cache.entry_count())
            .finish()
    }
}

impl ObjectStoreParquetReader {
    pub fn new(blob_cache: Arc<BlobCache>) -> Self {
        let metadata_cache = Cache::builder()
            .max_capacity(DEFAULT_METADATA_CACHE_BYTES)
            .weigher(|_key: &String, metadata: &Arc<ParquetMetaData>| -> u32 {
                metadata.memory_size().min(u32::MAX as usize) as u32
            })
            .build();
        Self {
            blob_cache,
            metadata_cache,
        }
    }

    async fn file_size(&self, file: &ParquetFile) -> Result<u64> {
        if let Some(size) = file.size_bytes {
            return Ok(size);
        }
        let meta = self
            .blob_cache
            .store()
            .head(&Path::from(file.path.as_str()))
            .await?;
        Ok(meta.size)
    }

    async fn open_reader(&self, file: &ParquetFile) -> Result<CachingReader> {
        let size = self.file_size(file).await?;
        Ok(CachingReader::new(
            Arc::clone(&self.blob_cache),
            Path::from(file.path.as_str()),
            size,
        ))
    }

    /// Resolves requested column names to leaf indices of the file's
    /// schema. Requesting an absent column is an error, never a silent
    /// default.
    fn leaf_indices(
        metadata: &ParquetMetaData,
        columns: &[String],
        file_path: &str,
    ) -> Result<Vec<usize>> {
        let schema = metadata.file_metadata().schema_descr();
        let mut leaves = Vec::with_capacity(columns.len());
        for column in columns {
            let found = (0..schema.num_columns()).find(|i| {
                let descr = schema.column(*i);
                descr.path().string() == *column || descr.name() == column
            });
            match found {
                Some(index) => leaves.push(index),
                None => {
                    return Err(Error::MissingColumn {
                        column: column.clone(),
                        path: file_path.to_string(),
                    });
                }
            }
        }
        Ok(leaves)
    }

    async fn build_stream(
        &self,
        file: &ParquetFile,
        columns: &[String],
        row_groups: Option<Vec<usize>>,
    ) -> Result<BatchStream> {
        let metadata = self.file_metadata(file).await?;
        let leaves = Self::leaf_indices(&metadata, columns, &file.path)?;
        let reader = self.open_reader(file).await?;
        let arrow_metadata =
            ArrowReaderMetadata::try_new(Arc::clone(&metadata), ArrowReaderOptions::new())?;
        let mut builder = ParquetRecordBatchStreamBuilder::new_with_metadata(reader, arrow_metadata);
        let mask = ProjectionMask::leaves(metadata.file_metadata().schema_descr(), leaves);
        builder = builder.with_projection(mask);
        if let Some(groups) = row_groups {
            builder = builder.with_row_groups(groups);
        }
        let stream = builder.build()?;
        Ok(stream.map(|batch| batch.map_err(Error::from)).boxed())
    }
}

#[async_trait]
impl ParquetReader for ObjectStoreParquetReader {
    async fn get_columns(&self, file: &ParquetFile) -> Result<Vec<ColumnMeta>> {
        let metadata = self.file_metadata(file).await?;
        let schema = metadata.file_metadata().schema_descr();
        Ok((0..schema.num_columns())
            .map(|i| {
                let descr = schema.column(i);
                ColumnMeta {
                    path: descr.path().string(),
                    physical: descr.physical_type(),
                    logical: descr.logical_type(),
                    nullable: descr.max_def_level() > 0,
                }
            })
            .collect())
    }

    async fn read_rows(
        &self,
        file: &ParquetFile,
        columns: &[String],
        row_groups: Option<Vec<usize>>,
    ) -> Result<BatchStream> {
        self.build_stream(file, columns, row_groups).await
    }

    async fn read_column_values_by_row_group(
        &self,
        file: &ParquetFile,
        column: &str,
    ) -> Result<Vec<Vec<Option<Scalar>>>> {
        let metadata = self.file_metadata(file).await?;
        let num_row_groups = metadata.num_row_groups();
        let columns = [column.to_string()];
        let mut per_group = Vec::with_capacity(num_row_groups);
        for group in 0..num_row_groups {
            let mut stream = self.build_stream(file, &columns, Some(vec![group])).await?;
            let mut values = Vec::new();
            while let Some(batch) = stream.next().await {
                let batch = batch?;
                let array = batch.column(0);
                for row in 0..batch.num_rows() {
                    values.push(array_scalar(array, row)?);
                }
            }
            per_group.push(values);
        }
        Ok(per_group)
    }

    async fn file_metadata(&self, file: &ParquetFile) -> Result<Arc<ParquetMetaData>> {
        let size = self.file_size(file).await?;
        let cache = Arc::clone(&self.blob_cache);
        let path = file.path.clone();
        self.metadata_cache
            .try_get_with(file.path.clone(), async move {
                let mut reader = CachingReader::new(cache, Path::from(path.as_str()), size);
                let metadata = reader.get_metadata(None).await?;
                Ok::<_, Error>(metadata)
            })
            .await
            .map_err(|e: Arc<Error>| (*e).clone())
    }

    async fn prefetch(&self, files: Vec<ParquetFile>) {
        let locations: Vec<Path> = files
            .iter()
            .filter(|f| match f.size_bytes {
                // known-oversized files would be downloaded and dropped
                Some(size) => self.blob_cache.should_cache(size),
                None => true,
            })
            .map(|f| Path::from(f.path.as_str()))
            .collect();
        debug!("reader_prefetch files={}", locations.len());
        self.blob_cache.prefetch(locations).await;
    }
}
