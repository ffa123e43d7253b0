use crate::error::{Error, Result};
use crate::expr::{Expr, Operator};
use crate::metadata::{ColumnBinding, TypeMetadata};
use crate::scalar::{Scalar, ScalarKind};
use std::collections::{BTreeSet, HashMap};

/// Conjoined lower/upper bounds on one column, tightened across all
/// comparisons the predicate makes on it.
#[derive(Debug, Clone, Default)]
pub struct RangeFilter {
    pub min: Option<Scalar>,
    pub min_inclusive: bool,
    pub max: Option<Scalar>,
    pub max_inclusive: bool,
}

impl RangeFilter {
    pub fn has_constraints(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    fn tighten_min(&mut self, value: Scalar, inclusive: bool) {
        let replace = match &self.min {
            None => true,
            Some(current) => match current.compare(&value) {
                Some(std::cmp::Ordering::Less) => true,
                Some(std::cmp::Ordering::Equal) => self.min_inclusive && !inclusive,
                _ => false,
            },
        };
        if replace {
            self.min = Some(value);
            self.min_inclusive = inclusive;
        }
    }

    fn tighten_max(&mut self, value: Scalar, inclusive: bool) {
        let replace = match &self.max {
            None => true,
            Some(current) => match current.compare(&value) {
                Some(std::cmp::Ordering::Greater) => true,
                Some(std::cmp::Ordering::Equal) => self.max_inclusive && !inclusive,
                _ => false,
            },
        };
        if replace {
            self.max = Some(value);
            self.max_inclusive = inclusive;
        }
    }

    /// True when no value can satisfy both bounds.
    pub fn is_contradictory(&self) -> bool {
        let (Some(min), Some(max)) = (&self.min, &self.max) else {
            return false;
        };
        match min.compare(max) {
            Some(std::cmp::Ordering::Greater) => true,
            Some(std::cmp::Ordering::Equal) => !(self.min_inclusive && self.max_inclusive),
            _ => false,
        }
    }
}

/// A predicate pushed down to the per-row-group sorted value index.
/// Columns are physical parquet column names.
#[derive(Debug, Clone)]
pub enum IndexedConstraint {
    Eq { column: String, value: Scalar },
    NotEq { column: String, value: Scalar },
    Cmp {
        column: String,
        op: Operator,
        value: Scalar,
    },
    StartsWith { column: String, prefix: String },
    /// Builds the index without pruning, keeping it warm for later
    /// queries that can use it.
    AlwaysMatch { column: String },
}

impl IndexedConstraint {
    pub fn column(&self) -> &str {
        match self {
            Self::Eq { column, .. }
            | Self::NotEq { column, .. }
            | Self::Cmp { column, .. }
            | Self::StartsWith { column, .. }
            | Self::AlwaysMatch { column } => column,
        }
    }
}

/// Everything the scan needs to know about a query, extracted in one walk
/// over the predicate tree.
#[derive(Debug, Clone, Default)]
pub struct QueryAnalysis {
    /// Lowercased partition key → equality filter value.
    pub partition_filters: HashMap<String, Scalar>,
    /// Parquet column name → conjoined bounds, for statistics pruning.
    pub range_filters: HashMap<String, RangeFilter>,
    pub indexed: Vec<IndexedConstraint>,
    /// Conjuncts that must be evaluated per row.
    pub residuals: Vec<Expr>,
    /// Fields of the row type the consumer materializes.
    pub projected_fields: BTreeSet<String>,
    /// Set when the bounds are contradictory; enumeration short-circuits
    /// to an empty stream without touching storage.
    pub provably_empty: bool,
}

impl QueryAnalysis {
    /// Walks the predicate, classifying each conjunct at the cheapest
    /// level it can be enforced: partition equality, statistics range,
    /// indexed constraint, or per-row residual.
    pub fn analyze(metadata: &'static TypeMetadata, filter: Option<&Expr>) -> Result<Self> {
        let mut analysis = Self {
            projected_fields: metadata.bindings.iter().map(|b| b.field.to_string()).collect(),
            ..Self::default()
        };
        let Some(filter) = filter else {
            return Ok(analysis);
        };
        for conjunct in filter.split_conjunction() {
            analysis.classify(metadata, conjunct)?;
        }
        // indexed columns touched only by residual conjuncts still warm
        // their index
        let residual_fields: BTreeSet<String> = analysis
            .residuals
            .iter()
            .flat_map(|e| e.referenced_fields())
            .collect();
        for binding in metadata.indexed_bindings() {
            if residual_fields.contains(binding.field)
                && !analysis.indexed.iter().any(|c| c.column() == binding.column)
            {
                analysis.indexed.push(IndexedConstraint::AlwaysMatch {
                    column: binding.column.to_string(),
                });
            }
        }
        if analysis.range_filters.values().any(RangeFilter::is_contradictory) {
            analysis.provably_empty = true;
        }
        Ok(analysis)
    }

    fn classify(&mut self, metadata: &TypeMetadata, conjunct: &Expr) -> Result<()> {
        // validate every referenced field up front, unknown names are a
        // query bug rather than an empty result
        for field in conjunct.referenced_fields() {
            if metadata.binding(&field).is_none() {
                return Err(Error::MissingColumn {
                    column: field,
                    path: metadata.type_name.to_string(),
                });
            }
        }
        match conjunct {
            Expr::Binary { left, op, right } => {
                let comparison = match (left.as_ref(), right.as_ref()) {
                    (Expr::Column(field), Expr::Literal(value)) => Some((field, *op, value)),
                    (Expr::Literal(value), Expr::Column(field)) => {
                        Some((field, op.swap(), value))
                    }
                    _ => None,
                };
                if let Some((field, op, value)) = comparison {
                    let binding = metadata
                        .binding(field)
                        .expect("field validated above");
                    return self.classify_comparison(binding, op, value, conjunct);
                }
                self.residuals.push(conjunct.clone());
            }
            Expr::StartsWith { field, prefix } => {
                let binding = metadata.binding(field).expect("field validated above");
                if binding.value_kind != ScalarKind::Utf8 {
                    return Err(Error::SchemaMismatch(format!(
                        "starts_with on non-string field {field}"
                    )));
                }
                if binding.indexed && !binding.is_partition() {
                    self.indexed.push(IndexedConstraint::StartsWith {
                        column: binding.column.to_string(),
                        prefix: prefix.clone(),
                    });
                }
                self.residuals.push(conjunct.clone());
            }
            other => self.residuals.push(other.clone()),
        }
        Ok(())
    }

    fn classify_comparison(
        &mut self,
        binding: &ColumnBinding,
        op: Operator,
        value: &Scalar,
        conjunct: &Expr,
    ) -> Result<()> {
        if binding.is_partition() {
            if op == Operator::Eq {
                let key = binding.partition_key();
                let conflicting = self
                    .partition_filters
                    .get(&key)
                    .map(|existing| !existing.equals(value))
                    .unwrap_or(false);
                if conflicting {
                    // two different equality constraints on one key
                    self.provably_empty = true;
                } else {
                    self.partition_filters.insert(key, value.clone());
                }
                // partition pruning enforces equality exactly, no residual
                return Ok(());
            }
            // non-equality comparisons on partition fields run per row
            // against the enriched constant columns
            self.residuals.push(conjunct.clone());
            return Ok(());
        }

        let column = binding.column.to_string();
        match op {
            Operator::Eq => {
                let range = self.range_filters.entry(column.clone()).or_default();
                range.tighten_min(value.clone(), true);
                range.tighten_max(value.clone(), true);
                if binding.indexed {
                    self.indexed.push(IndexedConstraint::Eq {
                        column,
                        value: value.clone(),
                    });
                }
            }
            Operator::Lt | Operator::LtEq => {
                let inclusive = op == Operator::LtEq;
                let range = self.range_filters.entry(column.clone()).or_default();
                range.tighten_max(value.clone(), inclusive);
                if binding.indexed {
                    self.indexed.push(IndexedConstraint::Cmp {
                        column,
                        op,
                        value: value.clone(),
                    });
                }
            }
            Operator::Gt | Operator::GtEq => {
                let inclusive = op == Operator::GtEq;
                let range = self.range_filters.entry(column.clone()).or_default();
                range.tighten_min(value.clone(), inclusive);
                if binding.indexed {
                    self.indexed.push(IndexedConstraint::Cmp {
                        column,
                        op,
                        value: value.clone(),
                    });
                }
            }
            Operator::NotEq => {
                if binding.indexed {
                    self.indexed.push(IndexedConstraint::NotEq {
                        column,
                        value: value.clone(),
                    });
                }
            }
            Operator::And | Operator::Or => {
                // a boolean combinator over a literal operand carries no
                // pushdown, it runs per row
                self.residuals.push(conjunct.clone());
                return Ok(());
            }
        }
        // statistics and index pruning are row-group granular, the exact
        // check still runs per row
        self.residuals.push(conjunct.clone());
        Ok(())
    }

    /// True when every projected field is a partition field and the whole
    /// predicate is enforceable from partition metadata, so enumeration
    /// never opens a data file.
    pub fn partition_only_projection(&self, metadata: &TypeMetadata) -> bool {
        if self.projected_fields.is_empty() {
            return false;
        }
        let all_projected_partition = self
            .projected_fields
            .iter()
            .all(|f| metadata.binding(f).map(|b| b.is_partition()).unwrap_or(false));
        let residuals_partition_only = self.residuals.iter().all(|e| {
            e.referenced_fields()
                .iter()
                .all(|f| metadata.binding(f).map(|b| b.is_partition()).unwrap_or(false))
        });
        all_projected_partition && residuals_partition_only && self.range_filters.is_empty()
    }

    /// Parquet columns the scan must fetch: projected data columns, data
    /// columns referenced by residuals, and indexed columns used for
    /// row-group pruning.
    pub fn columns_to_read(&self, metadata: &TypeMetadata) -> BTreeSet<String> {
        let mut columns = BTreeSet::new();
        for field in &self.projected_fields {
            if let Some(binding) = metadata.binding(field) {
                if !binding.is_partition() {
                    columns.insert(binding.column.to_string());
                }
            }
        }
        for residual in &self.residuals {
            for field in residual.referenced_fields() {
                if let Some(binding) = metadata.binding(&field) {
                    if !binding.is_partition() {
                        columns.insert(binding.column.to_string());
                    }
                }
            }
        }
        for constraint in &self.indexed {
            columns.insert(constraint.column().to_string());
        }
        columns
    }

    pub fn has_range_filters(&self) -> bool {
        self.range_filters.values().any(RangeFilter::has_constraints)
    }
}
