use crate::error::{Error, Result};
use crate::expr::{Expr, Operator};
use crate::metadata::TypeMetadata;
use crate::scalar::{Scalar, ScalarKind, epoch_days_to_date};
use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Date64Array, Float32Array, Float64Array,
    Int8Array, Int16Array, Int32Array, Int64Array, LargeStringArray, RecordBatch, StringArray,
    StringViewArray, TimestampMicrosecondArray, TimestampMillisecondArray,
    TimestampNanosecondArray, TimestampSecondArray, UInt8Array, UInt16Array, UInt32Array,
    UInt64Array,
};
use arrow::datatypes::{DataType, TimeUnit};
use chrono::{DateTime, NaiveDate, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Name prefix under which partition values appear as enriched constant
/// columns of a row.
pub const PARTITION_COLUMN_PREFIX: &str = "_partition_";

/// One record batch enriched with its partition's constant values.
///
/// Construction is O(columns); rows share the batch's buffers, and the
/// partition values are one shared vector per partition. Nothing is copied
/// per row.
pub struct RowBatch {
    batch: RecordBatch,
    partition_values: Arc<Vec<(String, String)>>,
    metadata: &'static TypeMetadata,
    /// Data fields resolved to batch column indices, once per batch.
    field_columns: HashMap<&'static str, usize>,
}

impl RowBatch {
    pub fn new(
        batch: RecordBatch,
        partition_values: Arc<Vec<(String, String)>>,
        metadata: &'static TypeMetadata,
    ) -> Self {
        let schema = batch.schema();
        let mut field_columns = HashMap::new();
        for binding in metadata.data_bindings() {
            if let Some((index, _)) = schema.column_with_name(binding.column) {
                field_columns.insert(binding.field, index);
            }
        }
        Self {
            batch,
            partition_values,
            metadata,
            field_columns,
        }
    }

    /// A batch with no data columns, used when rows are synthesized from
    /// partition metadata alone.
    pub fn partition_only(
        num_rows: usize,
        partition_values: Arc<Vec<(String, String)>>,
        metadata: &'static TypeMetadata,
    ) -> Self {
        let options = arrow::record_batch::RecordBatchOptions::new().with_row_count(Some(num_rows));
        let schema = Arc::new(arrow::datatypes::Schema::empty());
        let batch = RecordBatch::try_new_with_options(schema, vec![], &options)
            .expect("empty record batch construction cannot fail");
        Self {
            batch,
            partition_values,
            metadata,
            field_columns: HashMap::new(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn row(&self, row: usize) -> RowView<'_> {
        RowView { batch: self, row }
    }
}

/// A single materialized row: typed access over the batch's column
/// buffers plus the partition's constant columns.
#[derive(Clone, Copy)]
pub struct RowView<'a> {
    batch: &'a RowBatch,
    row: usize,
}

impl RowView<'_> {
    /// Typed access to a bound field, applying the physical→logical→target
    /// coercion once per read.
    pub fn get<V: FromRowValue>(&self, field: &str) -> Result<V> {
        let value = self.scalar(field)?;
        V::from_scalar(value, field)
    }

    /// Canonical scalar value of a field, `None` for null.
    pub fn scalar(&self, field: &str) -> Result<Option<Scalar>> {
        let binding = self.batch.metadata.binding(field).ok_or_else(|| {
            Error::MissingColumn {
                column: field.to_string(),
                path: self.batch.metadata.type_name.to_string(),
            }
        })?;
        if binding.is_partition() {
            return self
                .partition_column(&binding.partition_key())
                .map(|raw| Scalar::parse(binding.value_kind, raw))
                .transpose();
        }
        let index = self.batch.field_columns.get(binding.field).ok_or_else(|| {
            Error::MissingColumn {
                column: binding.column.to_string(),
                path: "projected batch".to_string(),
            }
        })?;
        array_scalar(self.batch.batch.column(*index), self.row)
    }

    /// Raw partition value for a lowercased key (the value of the
    /// `_partition_`-prefixed enriched column).
    pub fn partition_column(&self, key: &str) -> Option<&str> {
        let key = key.strip_prefix(PARTITION_COLUMN_PREFIX).unwrap_or(key);
        self.batch
            .partition_values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Evaluates a residual predicate against one row. Field accesses resolve
/// through the type metadata; partition fields read their enriched
/// constant columns.
pub fn evaluate_predicate(expr: &Expr, row: &RowView<'_>) -> Result<bool> {
    match expr {
        Expr::Binary {
            left,
            op: Operator::And,
            right,
        } => Ok(evaluate_predicate(left, row)? && evaluate_predicate(right, row)?),
        Expr::Binary {
            left,
            op: Operator::Or,
            right,
        } => Ok(evaluate_predicate(left, row)? || evaluate_predicate(right, row)?),
        Expr::Not(inner) => Ok(!evaluate_predicate(inner, row)?),
        Expr::Binary { left, op, right } => {
            let left = evaluate_scalar(left, row)?;
            let right = evaluate_scalar(right, row)?;
            Ok(compare_values(left.as_ref(), right.as_ref(), *op))
        }
        Expr::StartsWith { field, prefix } => match row.scalar(field)? {
            Some(Scalar::Utf8(value)) => Ok(value.starts_with(prefix.as_str())),
            Some(other) => Err(Error::SchemaMismatch(format!(
                "starts_with on non-string field {field} ({:?})",
                other.kind()
            ))),
            None => Ok(false),
        },
        Expr::Literal(Scalar::Bool(value)) => Ok(*value),
        Expr::Column(field) => match row.scalar(field)? {
            Some(Scalar::Bool(value)) => Ok(value),
            Some(other) => Err(Error::SchemaMismatch(format!(
                "field {field} ({:?}) used as a predicate",
                other.kind()
            ))),
            None => Ok(false),
        },
        other => Err(Error::Format(format!(
            "expression is not a predicate: {other}"
        ))),
    }
}

fn evaluate_scalar(expr: &Expr, row: &RowView<'_>) -> Result<Option<Scalar>> {
    match expr {
        Expr::Column(field) => row.scalar(field),
        Expr::Literal(value) => Ok(Some(value.clone())),
        other => Err(Error::Format(format!(
            "expression is not a scalar operand: {other}"
        ))),
    }
}

/// Comparison with null semantics of the row domain: nulls are equal to
/// each other, unordered against everything, and unequal to any value.
fn compare_values(left: Option<&Scalar>, right: Option<&Scalar>, op: Operator) -> bool {
    match (left, right) {
        (Some(a), Some(b)) => match a.compare(b) {
            Some(ordering) => match op {
                Operator::Eq => ordering == Ordering::Equal,
                Operator::NotEq => ordering != Ordering::Equal,
                Operator::Lt => ordering == Ordering::Less,
                Operator::LtEq => ordering != Ordering::Greater,
                Operator::Gt => ordering == Ordering::Greater,
                Operator::GtEq => ordering != Ordering::Less,
                Operator::And | Operator::Or => false,
            },
            None => op == Operator::NotEq,
        },
        (None, None) => matches!(op, Operator::Eq),
        _ => matches!(op, Operator::NotEq),
    }
}

/// Extracts the canonical scalar at `row` from an arrow array, `None` for
/// null. Unsupported physical types fail with `SchemaMismatch`.
pub fn array_scalar(array: &ArrayRef, row: usize) -> Result<Option<Scalar>> {
    if array.is_null(row) {
        return Ok(None);
    }
    let value = match array.data_type() {
        DataType::Boolean => Scalar::Bool(downcast::<BooleanArray>(array)?.value(row)),
        DataType::Int8 => Scalar::Int64(downcast::<Int8Array>(array)?.value(row) as i64),
        DataType::Int16 => Scalar::Int64(downcast::<Int16Array>(array)?.value(row) as i64),
        DataType::Int32 => Scalar::Int64(downcast::<Int32Array>(array)?.value(row) as i64),
        DataType::Int64 => Scalar::Int64(downcast::<Int64Array>(array)?.value(row)),
        DataType::UInt8 => Scalar::Int64(downcast::<UInt8Array>(array)?.value(row) as i64),
        DataType::UInt16 => Scalar::Int64(downcast::<UInt16Array>(array)?.value(row) as i64),
        DataType::UInt32 => Scalar::Int64(downcast::<UInt32Array>(array)?.value(row) as i64),
        DataType::UInt64 => {
            let value = downcast::<UInt64Array>(array)?.value(row);
            Scalar::Int64(i64::try_from(value).map_err(|_| {
                Error::Overflow(format!("u64 value {value} does not fit a 64-bit signed value"))
            })?)
        }
        DataType::Float32 => Scalar::Float64(downcast::<Float32Array>(array)?.value(row) as f64),
        DataType::Float64 => Scalar::Float64(downcast::<Float64Array>(array)?.value(row)),
        DataType::Utf8 => Scalar::Utf8(downcast::<StringArray>(array)?.value(row).to_string()),
        DataType::LargeUtf8 => {
            Scalar::Utf8(downcast::<LargeStringArray>(array)?.value(row).to_string())
        }
        DataType::Utf8View => {
            Scalar::Utf8(downcast::<StringViewArray>(array)?.value(row).to_string())
        }
        DataType::Date32 => {
            let days = downcast::<Date32Array>(array)?.value(row);
            Scalar::Date(epoch_days_to_date(days).ok_or_else(|| {
                Error::Overflow(format!("date out of range: {days} days since epoch"))
            })?)
        }
        DataType::Date64 => {
            let millis = downcast::<Date64Array>(array)?.value(row);
            Scalar::Timestamp(DateTime::from_timestamp_millis(millis).ok_or_else(|| {
                Error::Overflow(format!("date64 out of range: {millis}"))
            })?)
        }
        DataType::Timestamp(unit, _) => {
            let raw = match unit {
                TimeUnit::Second => downcast::<TimestampSecondArray>(array)?.value(row) * 1_000,
                TimeUnit::Millisecond => downcast::<TimestampMillisecondArray>(array)?.value(row),
                TimeUnit::Microsecond => {
                    return Ok(Some(Scalar::Timestamp(
                        DateTime::from_timestamp_micros(
                            downcast::<TimestampMicrosecondArray>(array)?.value(row),
                        )
                        .ok_or_else(|| Error::Overflow("timestamp out of range".into()))?,
                    )));
                }
                TimeUnit::Nanosecond => {
                    return Ok(Some(Scalar::Timestamp(DateTime::from_timestamp_nanos(
                        downcast::<TimestampNanosecondArray>(array)?.value(row),
                    ))));
                }
            };
            Scalar::Timestamp(
                DateTime::from_timestamp_millis(raw)
                    .ok_or_else(|| Error::Overflow("timestamp out of range".into()))?,
            )
        }
        other => {
            return Err(Error::SchemaMismatch(format!(
                "unsupported column type {other}"
            )));
        }
    };
    Ok(Some(value))
}

fn downcast<T: 'static>(array: &ArrayRef) -> Result<&T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        Error::SchemaMismatch(format!("cannot downcast column of type {}", array.data_type()))
    })
}

/// Conversion from a canonical scalar into a target field type.
///
/// Numeric widening is implicit; narrowing out of range fails `Overflow`;
/// string sources parse with invariant semantics and fail `Format`; null
/// into a non-optional target is a `SchemaMismatch`.
pub trait FromRowValue: Sized {
    fn from_scalar(value: Option<Scalar>, field: &str) -> Result<Self>;
}

fn required(value: Option<Scalar>, field: &str) -> Result<Scalar> {
    value.ok_or_else(|| {
        Error::SchemaMismatch(format!("null value in non-nullable field {field}"))
    })
}

fn to_i64(value: Scalar, field: &str) -> Result<i64> {
    match value {
        Scalar::Int64(v) => Ok(v),
        Scalar::Utf8(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::Format(format!("cannot parse {s:?} as integer for {field}"))),
        other => Err(Error::SchemaMismatch(format!(
            "cannot read {:?} as integer for {field}",
            other.kind()
        ))),
    }
}

macro_rules! int_from_row_value {
    ($($t:ty),*) => {$(
        impl FromRowValue for $t {
            fn from_scalar(value: Option<Scalar>, field: &str) -> Result<Self> {
                let wide = to_i64(required(value, field)?, field)?;
                <$t>::try_from(wide).map_err(|_| {
                    Error::Overflow(format!(
                        "value {wide} of field {field} does not fit {}",
                        stringify!($t)
                    ))
                })
            }
        }
    )*};
}

int_from_row_value!(i8, i16, i32, i64, u8, u16, u32, u64);

impl FromRowValue for f64 {
    fn from_scalar(value: Option<Scalar>, field: &str) -> Result<Self> {
        match required(value, field)? {
            Scalar::Float64(v) => Ok(v),
            Scalar::Int64(v) => Ok(v as f64),
            Scalar::Utf8(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| Error::Format(format!("cannot parse {s:?} as float for {field}"))),
            other => Err(Error::SchemaMismatch(format!(
                "cannot read {:?} as float for {field}",
                other.kind()
            ))),
        }
    }
}

impl FromRowValue for f32 {
    fn from_scalar(value: Option<Scalar>, field: &str) -> Result<Self> {
        f64::from_scalar(value, field).map(|v| v as f32)
    }
}

impl FromRowValue for bool {
    fn from_scalar(value: Option<Scalar>, field: &str) -> Result<Self> {
        match required(value, field)? {
            Scalar::Bool(v) => Ok(v),
            other => Err(Error::SchemaMismatch(format!(
                "cannot read {:?} as bool for {field}",
                other.kind()
            ))),
        }
    }
}

impl FromRowValue for String {
    fn from_scalar(value: Option<Scalar>, field: &str) -> Result<Self> {
        match required(value, field)? {
            Scalar::Utf8(v) => Ok(v),
            other => Ok(other.to_string()),
        }
    }
}

impl FromRowValue for NaiveDate {
    fn from_scalar(value: Option<Scalar>, field: &str) -> Result<Self> {
        match required(value, field)? {
            Scalar::Date(v) => Ok(v),
            Scalar::Timestamp(v) => Ok(v.date_naive()),
            other => Err(Error::SchemaMismatch(format!(
                "cannot read {:?} as date for {field}",
                other.kind()
            ))),
        }
    }
}

impl FromRowValue for DateTime<Utc> {
    fn from_scalar(value: Option<Scalar>, field: &str) -> Result<Self> {
        match required(value, field)? {
            Scalar::Timestamp(v) => Ok(v),
            Scalar::Date(v) => v
                .and_hms_opt(0, 0, 0)
                .map(|naive| naive.and_utc())
                .ok_or_else(|| Error::Overflow(format!("date out of range for {field}"))),
            other => Err(Error::SchemaMismatch(format!(
                "cannot read {:?} as timestamp for {field}",
                other.kind()
            ))),
        }
    }
}

impl FromRowValue for Uuid {
    fn from_scalar(value: Option<Scalar>, field: &str) -> Result<Self> {
        match required(value, field)? {
            Scalar::Uuid(v) => Ok(v),
            Scalar::Utf8(s) => Uuid::parse_str(&s)
                .map_err(|_| Error::Format(format!("cannot parse {s:?} as uuid for {field}"))),
            other => Err(Error::SchemaMismatch(format!(
                "cannot read {:?} as uuid for {field}",
                other.kind()
            ))),
        }
    }
}

impl<T: FromRowValue> FromRowValue for Option<T> {
    fn from_scalar(value: Option<Scalar>, field: &str) -> Result<Self> {
        match value {
            None => Ok(None),
            some => T::from_scalar(some, field).map(Some),
        }
    }
}

/// Scalar kind a row type field expects, used when indexed values are
/// converted from raw column data.
pub fn convert_indexed_value(
    value: Option<Scalar>,
    kind: ScalarKind,
    nullable: bool,
    column: &str,
) -> Result<Option<Scalar>> {
    match value {
        None if nullable => Ok(None),
        None => Err(Error::SchemaMismatch(format!(
            "null value in non-nullable indexed column {column}"
        ))),
        Some(value) => {
            if value.kind() == kind {
                return Ok(Some(value));
            }
            // kinds that decode differently from storage coerce here once
            match (&value, kind) {
                (Scalar::Int64(v), ScalarKind::Float64) => Ok(Some(Scalar::Float64(*v as f64))),
                (Scalar::Utf8(s), _) if kind != ScalarKind::Utf8 => {
                    Scalar::parse(kind, s).map(Some)
                }
                _ => Err(Error::SchemaMismatch(format!(
                    "indexed column {column}: stored {:?} does not convert to {kind:?}",
                    value.kind()
                ))),
            }
        }
    }
}
