use crate::analysis::RangeFilter;
use crate::partition::{ParquetFile, Partition, RowGroupInfo};
use crate::scalar::{Scalar, partition_value_matches};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Drops partitions that provably fail an equality filter. A partition
/// that lacks the filtered key is kept.
pub fn prune_partitions(
    partitions: Vec<Partition>,
    filters: &HashMap<String, Scalar>,
) -> Vec<Partition> {
    partitions
        .into_iter()
        .filter(|partition| {
            filters.iter().all(|(key, filter)| match partition.value(key) {
                Some(raw) => partition_value_matches(raw, filter),
                None => true,
            })
        })
        .collect()
}

/// Whether a row group could hold a value inside the filter's bounds.
/// Absent or undecodable statistics keep the group.
fn row_group_overlaps(group: &RowGroupInfo, column: &str, filter: &RangeFilter) -> bool {
    let Some(stats) = group.column_stats.get(column) else {
        return true;
    };
    if !stats.has_min_max() {
        return true;
    }
    let (Some(group_min), Some(group_max)) = (stats.min(), stats.max()) else {
        return true;
    };
    if let Some(lo) = &filter.min {
        // the whole group sits below the lower bound
        match group_max.compare(lo) {
            Some(Ordering::Less) => return false,
            Some(Ordering::Equal) if !filter.min_inclusive => return false,
            _ => {}
        }
    }
    if let Some(hi) = &filter.max {
        match group_min.compare(hi) {
            Some(Ordering::Greater) => return false,
            Some(Ordering::Equal) if !filter.max_inclusive => return false,
            _ => {}
        }
    }
    true
}

/// Whether a row group satisfies every range filter's overlap test.
pub fn row_group_allowed(group: &RowGroupInfo, filters: &HashMap<String, RangeFilter>) -> bool {
    filters
        .iter()
        .filter(|(_, f)| f.has_constraints())
        .all(|(column, filter)| row_group_overlaps(group, column, filter))
}

/// A file survives iff at least one of its row groups could overlap every
/// filter. A file without enriched statistics always survives.
pub fn file_may_match(file: &ParquetFile, filters: &HashMap<String, RangeFilter>) -> bool {
    if file.row_groups.is_empty() {
        return true;
    }
    file.row_groups
        .iter()
        .any(|group| row_group_allowed(group, filters))
}

/// Applies file pruning across partitions and drops partitions that end
/// up empty.
pub fn prune_files(partitions: Vec<Partition>, filters: &HashMap<String, RangeFilter>) -> Vec<Partition> {
    partitions
        .into_iter()
        .filter_map(|mut partition| {
            partition.files.retain(|file| file_may_match(file, filters));
            (!partition.files.is_empty()).then_some(partition)
        })
        .collect()
}

/// Row groups of a file that pass the statistics overlap test. `None`
/// means the file has no enriched row groups, so the subset is unknown
/// and the reader must touch all of them.
pub fn allowed_row_groups_by_stats(
    file: &ParquetFile,
    filters: &HashMap<String, RangeFilter>,
) -> Option<Vec<usize>> {
    if file.row_groups.is_empty() {
        return None;
    }
    Some(
        file.row_groups
            .iter()
            .filter(|group| row_group_allowed(group, filters))
            .map(|group| group.index)
            .collect(),
    )
}
