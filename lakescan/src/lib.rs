//! Lakescan: typed, expression-driven queries over partitioned parquet
//! tables on a local filesystem or an object store.
//!
//! A row type declares its column bindings (data column, partition key,
//! indexed column) and is registered once; a [`table::Table`] handle then
//! discovers the physical layout (Hive directories or a Delta transaction
//! log), prunes partitions, files, and row groups from predicate analysis
//! and parquet statistics, reads only the columns the query needs, and
//! streams materialized rows.

// crate-specific lint exceptions:
#![allow(clippy::missing_errors_doc)]

/// Predicate classification and projected column resolution
pub mod analysis;
/// Partition layout discovery: Hive directories and Delta logs
pub mod discovery;
/// Crate-wide error taxonomy
pub mod error;
/// Structured predicate tree and its builders
pub mod expr;
/// Per-file sorted column indexes for point, range, and prefix pruning
pub mod index;
/// Row type descriptors and the process-global registry
pub mod metadata;
/// Partition, file, and row-group records shared across the pipeline
pub mod partition;
/// Partition, file, and row-group pruning
pub mod prune;
/// Read access to parquet files over the blob cache
pub mod reader;
/// Row materialization and typed, coerced column access
pub mod row;
/// Total-ordered scalar values, partition value parsing, statistics decoding
pub mod scalar;
/// The consumer-driven enumeration pipeline
mod scan;
/// Per-file statistics enrichment
pub mod stats;
/// Blob caching with single-flight downloads and range reads
pub mod store;
/// The typed table handle
pub mod table;
