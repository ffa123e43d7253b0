use crate::scalar::{Scalar, decode_stat_value};
use bytes::Bytes;
use parquet::basic::{LogicalType, Type as PhysicalType};
use std::collections::HashMap;

/// A directory (or Delta file group) sharing one tuple of partition-key
/// values. Immutable after discovery; shared by value.
#[derive(Debug, Clone)]
pub struct Partition {
    pub path: String,
    /// Partition keys (lowercased) with their raw values, in path order.
    pub values: Vec<(String, String)>,
    pub files: Vec<ParquetFile>,
}

impl Partition {
    /// Raw value of a partition key, compared case-insensitively.
    pub fn value(&self, key: &str) -> Option<&str> {
        let key = key.to_lowercase();
        self.values
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// One data file of a partition. Size, row count, and row groups are
/// absent until the statistics enricher fills them.
#[derive(Debug, Clone, Default)]
pub struct ParquetFile {
    pub path: String,
    pub size_bytes: Option<u64>,
    pub row_count: Option<u64>,
    pub row_groups: Vec<RowGroupInfo>,
}

impl ParquetFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Per-row-group metadata filled by the statistics enricher.
#[derive(Debug, Clone)]
pub struct RowGroupInfo {
    pub index: usize,
    pub num_rows: Option<u64>,
    pub total_byte_size: Option<u64>,
    /// Keyed by dotted column path.
    pub column_stats: HashMap<String, ColumnStatistics>,
}

/// Raw per-column statistics of one row group.
///
/// Min/max bytes stay verbatim as read from the footer; decoding is
/// type-directed and deferred to comparison time.
#[derive(Debug, Clone)]
pub struct ColumnStatistics {
    pub physical: PhysicalType,
    pub logical: Option<LogicalType>,
    pub min_raw: Option<Bytes>,
    pub max_raw: Option<Bytes>,
    pub null_count: Option<u64>,
    pub distinct_count: Option<u64>,
}

impl ColumnStatistics {
    pub fn has_min_max(&self) -> bool {
        self.min_raw.is_some() && self.max_raw.is_some()
    }

    pub fn min(&self) -> Option<Scalar> {
        decode_stat_value(self.min_raw.as_deref()?, self.physical, self.logical.as_ref())
    }

    pub fn max(&self) -> Option<Scalar> {
        decode_stat_value(self.max_raw.as_deref()?, self.physical, self.logical.as_ref())
    }
}
