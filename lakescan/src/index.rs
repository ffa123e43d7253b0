use crate::analysis::IndexedConstraint;
use crate::error::{Error, Result};
use crate::expr::Operator;
use crate::metadata::TypeMetadata;
use crate::partition::ParquetFile;
use crate::reader::ParquetReader;
use crate::row::convert_indexed_value;
use crate::scalar::{Scalar, prefix_upper_bound};
use log::debug;
use moka::future::Cache;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Default indexed files tracked per handle.
const DEFAULT_INDEX_CACHE_ENTRIES: u64 = 16 * 1024;

/// Non-null values of one row group, sorted by the column's total order.
#[derive(Debug)]
struct SortedValues {
    values: Vec<Scalar>,
}

impl SortedValues {
    fn min(&self) -> Option<&Scalar> {
        self.values.first()
    }

    fn max(&self) -> Option<&Scalar> {
        self.values.last()
    }

    fn contains(&self, value: &Scalar) -> bool {
        self.values
            .binary_search_by(|probe| probe.total_order(value))
            .is_ok()
    }

    /// True when every value equals `value` (and there is at least one).
    fn is_constant(&self, value: &Scalar) -> bool {
        match (self.min(), self.max()) {
            (Some(min), Some(max)) => min.equals(value) && max.equals(value),
            _ => false,
        }
    }
}

/// Sorted per-row-group value index of one (file, column) pair.
#[derive(Debug)]
pub struct RowGroupIndex {
    row_groups: Vec<SortedValues>,
}

impl RowGroupIndex {
    pub fn num_row_groups(&self) -> usize {
        self.row_groups.len()
    }

    /// Row groups that may contain a row satisfying the constraint.
    fn allowed(&self, constraint: &IndexedConstraint, nullable: bool) -> BTreeSet<usize> {
        self.row_groups
            .iter()
            .enumerate()
            .filter(|(_, values)| may_match(values, constraint, nullable))
            .map(|(index, _)| index)
            .collect()
    }
}

fn may_match(values: &SortedValues, constraint: &IndexedConstraint, nullable: bool) -> bool {
    match constraint {
        IndexedConstraint::AlwaysMatch { .. } => true,
        IndexedConstraint::Eq { value, .. } => values.contains(value),
        IndexedConstraint::NotEq { value, .. } => {
            // a nullable column may hold nulls the index does not see,
            // and null != v holds in the row domain
            if nullable {
                return true;
            }
            !values.is_constant(value) && !values.values.is_empty()
        }
        IndexedConstraint::Cmp { op, value, .. } => {
            let (Some(min), Some(max)) = (values.min(), values.max()) else {
                return false;
            };
            match op {
                Operator::Lt => min.compare(value) == Some(std::cmp::Ordering::Less),
                Operator::LtEq => min.compare(value) != Some(std::cmp::Ordering::Greater),
                Operator::Gt => max.compare(value) == Some(std::cmp::Ordering::Greater),
                Operator::GtEq => max.compare(value) != Some(std::cmp::Ordering::Less),
                _ => true,
            }
        }
        IndexedConstraint::StartsWith { prefix, .. } => {
            if values.values.is_empty() {
                return false;
            }
            if prefix.is_empty() {
                return true;
            }
            let lower = Scalar::Utf8(prefix.clone());
            // any value in [prefix, prefix⁺) ?
            let below_upper = match prefix_upper_bound(prefix) {
                Some(upper) => {
                    let upper = Scalar::Utf8(upper);
                    values
                        .min()
                        .map(|min| min.compare(&upper) == Some(std::cmp::Ordering::Less))
                        .unwrap_or(false)
                }
                None => true,
            };
            let above_lower = values
                .max()
                .map(|max| max.compare(&lower) != Some(std::cmp::Ordering::Less))
                .unwrap_or(false);
            below_upper && above_lower
        }
    }
}

/// Builds and caches sorted value indexes for indexed columns.
///
/// One index is built per (file, column) per handle no matter how many
/// queries or concurrent scans ask for it; `try_get_with` makes the first
/// build single-flight.
pub struct IndexedColumnEngine {
    reader: Arc<dyn ParquetReader>,
    cache: Cache<(String, String), Arc<RowGroupIndex>>,
}

impl std::fmt::Debug for IndexedColumnEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexedColumnEngine")
            .field("cached_indexes", &self.cache.entry_count())
            .finish()
    }
}

impl IndexedColumnEngine {
    pub fn new(reader: Arc<dyn ParquetReader>) -> Self {
        Self {
            reader,
            cache: Cache::new(DEFAULT_INDEX_CACHE_ENTRIES),
        }
    }

    /// Intersection of the row groups allowed by every constraint.
    /// `Ok(None)` means no constraints apply, so all groups are allowed.
    pub async fn allowed_row_groups(
        &self,
        file: &ParquetFile,
        constraints: &[IndexedConstraint],
        metadata: &'static TypeMetadata,
    ) -> Result<Option<BTreeSet<usize>>> {
        if constraints.is_empty() {
            return Ok(None);
        }
        let mut allowed: Option<BTreeSet<usize>> = None;
        for constraint in constraints {
            let column = constraint.column();
            let binding = metadata
                .bindings
                .iter()
                .find(|b| b.column == column && b.indexed)
                .ok_or_else(|| {
                    Error::SchemaMismatch(format!("{column} is not an indexed column"))
                })?;
            let index = self
                .index_for(file, column, binding.value_kind, binding.nullable)
                .await?;
            let for_constraint = index.allowed(constraint, binding.nullable);
            allowed = Some(match allowed {
                None => for_constraint,
                Some(current) => current.intersection(&for_constraint).copied().collect(),
            });
            if allowed.as_ref().map(BTreeSet::is_empty).unwrap_or(false) {
                break;
            }
        }
        Ok(allowed)
    }

    async fn index_for(
        &self,
        file: &ParquetFile,
        column: &str,
        kind: crate::scalar::ScalarKind,
        nullable: bool,
    ) -> Result<Arc<RowGroupIndex>> {
        let reader = Arc::clone(&self.reader);
        let file = file.clone();
        let column_name = column.to_string();
        self.cache
            .try_get_with((file.path.clone(), column_name.clone()), async move {
                debug!("index_build file={} column={column_name}", file.path);
                let raw = reader
                    .read_column_values_by_row_group(&file, &column_name)
                    .await?;
                let row_groups = raw
                    .into_iter()
                    .map(|group| {
                        let mut values = Vec::with_capacity(group.len());
                        for value in group {
                            if let Some(converted) =
                                convert_indexed_value(value, kind, nullable, &column_name)?
                            {
                                values.push(converted);
                            }
                        }
                        values.sort_by(|a, b| a.total_order(b));
                        Ok(SortedValues { values })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok::<_, Error>(Arc::new(RowGroupIndex { row_groups }))
            })
            .await
            .map_err(|e: Arc<Error>| (*e).clone())
    }

    /// Drops every cached index.
    pub fn clear_cache(&self) {
        self.cache.invalidate_all();
    }
}
