/// Size-bounded blob cache with single-flight downloads and prefetch
pub mod blob_cache;
/// Byte-range reads over cached blobs, for parquet footer and column I/O
pub mod caching_reader;
