use crate::error::{Error, Result};
use bytes::Bytes;
use futures::StreamExt;
use log::debug;
use moka::future::Cache;
use moka::notification::RemovalCause;
use object_store::{ObjectStore, path::Path};
use std::sync::Arc;

/// Default cache size (1 GiB)
const DEFAULT_CACHE_SIZE_BYTES: u64 = 1024 * 1024 * 1024;

/// Default prefetch fan-out
const DEFAULT_PREFETCH_PARALLELISM: usize = 8;

/// Tuning knobs for the blob cache. The defaults are the process-wide
/// ones; every table handle may override them.
#[derive(Debug, Clone)]
pub struct BlobCacheConfig {
    /// Memory budget for cached blob contents.
    pub max_bytes: u64,
    /// Blobs larger than this are read directly and never cached.
    /// Defaults to `max_bytes`.
    pub max_entry_bytes: u64,
    /// Concurrent downloads issued by [`BlobCache::prefetch`].
    pub prefetch_parallelism: usize,
}

impl Default for BlobCacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_CACHE_SIZE_BYTES,
            max_entry_bytes: DEFAULT_CACHE_SIZE_BYTES,
            prefetch_parallelism: DEFAULT_PREFETCH_PARALLELISM,
        }
    }
}

/// Cache entry storing blob data and its size for weight calculation
#[derive(Clone)]
struct CacheEntry {
    data: Bytes,
    size: u32,
}

/// Blob content cache shared across all readers of a table handle.
///
/// Memory budget is based on blob size. `try_get_with` coalesces
/// concurrent requests for the same uncached blob into a single download,
/// so one `get` reaches the store no matter how many readers race.
pub struct BlobCache {
    store: Arc<dyn ObjectStore>,
    cache: Cache<String, CacheEntry>,
    max_entry_bytes: u64,
    prefetch_parallelism: usize,
}

impl BlobCache {
    pub fn new(store: Arc<dyn ObjectStore>, config: BlobCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_bytes)
            .weigher(|_key: &String, entry: &CacheEntry| -> u32 { entry.size })
            .eviction_listener(|key: Arc<String>, entry: CacheEntry, cause: RemovalCause| {
                if cause == RemovalCause::Size {
                    debug!("blob_cache_evict blob={key} size={}", entry.size);
                }
            })
            .build();
        Self {
            store,
            cache,
            max_entry_bytes: config.max_entry_bytes,
            prefetch_parallelism: config.prefetch_parallelism.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Whether a blob of this size is admitted into the cache.
    pub fn should_cache(&self, size: u64) -> bool {
        size <= self.max_entry_bytes && size <= u32::MAX as u64
    }

    /// Full blob contents. Cached blobs are served from memory; a miss
    /// downloads under single-flight, then caches. Oversized blobs are
    /// downloaded on every call and never cached.
    pub async fn open(&self, location: &Path) -> Result<Bytes> {
        let meta = self.store.head(location).await?;
        if !self.should_cache(meta.size) {
            debug!("blob_cache_skip blob={location} size={}", meta.size);
            let result = self.store.get(location).await?;
            return Ok(result.bytes().await?);
        }
        self.get_or_download(location, meta.size).await
    }

    /// Same as [`BlobCache::open`] for a blob whose size is already known,
    /// skipping the `head` round-trip.
    pub async fn open_sized(&self, location: &Path, size: u64) -> Result<Bytes> {
        if !self.should_cache(size) {
            debug!("blob_cache_skip blob={location} size={size}");
            let result = self.store.get(location).await?;
            return Ok(result.bytes().await?);
        }
        self.get_or_download(location, size).await
    }

    async fn get_or_download(&self, location: &Path, size: u64) -> Result<Bytes> {
        let store = Arc::clone(&self.store);
        let path = location.clone();
        let entry = self
            .cache
            .try_get_with(location.to_string(), async move {
                debug!("blob_cache_load blob={path} size={size}");
                let result = store.get(&path).await?;
                let data = result.bytes().await?;
                Ok::<_, Error>(CacheEntry {
                    data,
                    size: size as u32,
                })
            })
            .await
            .map_err(|e: Arc<Error>| (*e).clone())?;
        Ok(entry.data)
    }

    /// Warms the cache for the given blobs with bounded concurrency.
    /// Errors are swallowed: an on-demand open will surface them.
    pub async fn prefetch(&self, locations: Vec<Path>) {
        futures::stream::iter(locations)
            .for_each_concurrent(Some(self.prefetch_parallelism), |location| async move {
                if let Err(e) = self.open(&location).await {
                    debug!("prefetch_failed blob={location} error={e}");
                }
            })
            .await;
    }

    /// Returns cache statistics (entry_count, weighted_size_bytes).
    pub fn stats(&self) -> (u64, u64) {
        (self.cache.entry_count(), self.cache.weighted_size())
    }

    /// Runs pending cache maintenance so statistics are up-to-date,
    /// particularly useful in test scenarios.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

impl std::fmt::Debug for BlobCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (entries, size) = self.stats();
        f.debug_struct("BlobCache")
            .field("entries", &entries)
            .field("weighted_size_bytes", &size)
            .field("max_entry_bytes", &self.max_entry_bytes)
            .finish()
    }
}
