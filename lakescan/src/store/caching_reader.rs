use super::blob_cache::BlobCache;
use bytes::Bytes;
use futures::future::BoxFuture;
use log::debug;
use object_store::path::Path;
use parquet::arrow::arrow_reader::ArrowReaderOptions;
use parquet::arrow::async_reader::AsyncFileReader;
use parquet::errors::ParquetError;
use parquet::file::metadata::{ParquetMetaData, ParquetMetaDataReader};
use std::ops::Range;
use std::sync::Arc;

/// Byte-range access to one blob through the shared [`BlobCache`].
///
/// Small blobs are pulled whole into the cache and sliced locally; blobs
/// over the cache's entry cap are served as direct range reads so footer
/// and column-chunk access never downloads them entirely.
pub struct CachingReader {
    cache: Arc<BlobCache>,
    location: Path,
    file_size: u64,
    /// Local copy for this reader instance, avoids repeated cache lookups.
    cached_data: Option<Bytes>,
}

impl CachingReader {
    pub fn new(cache: Arc<BlobCache>, location: Path, file_size: u64) -> Self {
        Self {
            cache,
            location,
            file_size,
            cached_data: None,
        }
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    async fn load_blob(&mut self) -> Result<Bytes, ParquetError> {
        if let Some(data) = &self.cached_data {
            return Ok(data.clone());
        }
        let data = self
            .cache
            .open_sized(&self.location, self.file_size)
            .await
            .map_err(|e| ParquetError::External(Box::new(e)))?;
        self.cached_data = Some(data.clone());
        Ok(data)
    }

    pub async fn read_range(&mut self, range: Range<u64>) -> Result<Bytes, ParquetError> {
        if self.cache.should_cache(self.file_size) {
            let data = self.load_blob().await?;
            return Ok(data.slice(range.start as usize..range.end as usize));
        }
        debug!(
            "blob_range_read blob={} range={}..{}",
            self.location, range.start, range.end
        );
        self.cache
            .store()
            .get_range(&self.location, range)
            .await
            .map_err(|e| ParquetError::External(Box::new(e)))
    }

    pub async fn read_ranges(&mut self, ranges: Vec<Range<u64>>) -> Result<Vec<Bytes>, ParquetError> {
        if self.cache.should_cache(self.file_size) {
            let data = self.load_blob().await?;
            return Ok(ranges
                .into_iter()
                .map(|r| data.slice(r.start as usize..r.end as usize))
                .collect());
        }
        debug!(
            "blob_range_read blob={} ranges={}",
            self.location,
            ranges.len()
        );
        self.cache
            .store()
            .get_ranges(&self.location, &ranges)
            .await
            .map_err(|e| ParquetError::External(Box::new(e)))
    }
}

impl AsyncFileReader for CachingReader {
    fn get_bytes(&mut self, range: Range<u64>) -> BoxFuture<'_, Result<Bytes, ParquetError>> {
        let location = self.location.clone();
        Box::pin(async move {
            let start = std::time::Instant::now();
            let bytes_requested = range.end - range.start;
            let result = self.read_range(range).await;
            debug!(
                "object_storage_read blob={location} bytes={bytes_requested} duration_ms={}",
                start.elapsed().as_millis()
            );
            result
        })
    }

    fn get_byte_ranges(
        &mut self,
        ranges: Vec<Range<u64>>,
    ) -> BoxFuture<'_, Result<Vec<Bytes>, ParquetError>> {
        let location = self.location.clone();
        Box::pin(async move {
            let start = std::time::Instant::now();
            let num_ranges = ranges.len();
            let total_bytes: u64 = ranges.iter().map(|r| r.end - r.start).sum();
            let result = self.read_ranges(ranges).await;
            debug!(
                "object_storage_read blob={location} ranges={num_ranges} bytes={total_bytes} duration_ms={}",
                start.elapsed().as_millis()
            );
            result
        })
    }

    fn get_metadata(
        &mut self,
        _options: Option<&ArrowReaderOptions>,
    ) -> BoxFuture<'_, Result<Arc<ParquetMetaData>, ParquetError>> {
        Box::pin(async move {
            let file_size = self.file_size;
            let metadata = ParquetMetaDataReader::new()
                .load_and_finish(&mut *self, file_size)
                .await?;
            Ok(Arc::new(metadata))
        })
    }
}
