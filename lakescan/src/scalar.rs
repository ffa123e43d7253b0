use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use parquet::basic::{LogicalType, TimeUnit, Type as PhysicalType};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// Canonical value kind of a bound column.
///
/// Narrower numeric targets (u8, i32, ...) are handled at row access time;
/// the engine itself only tracks the canonical kinds below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Bool,
    Int64,
    Float64,
    Utf8,
    Date,
    Timestamp,
    Uuid,
}

/// A single total-ordered value: filter literal, partition value,
/// statistics bound, or index entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Self::Bool(_) => ScalarKind::Bool,
            Self::Int64(_) => ScalarKind::Int64,
            Self::Float64(_) => ScalarKind::Float64,
            Self::Utf8(_) => ScalarKind::Utf8,
            Self::Date(_) => ScalarKind::Date,
            Self::Timestamp(_) => ScalarKind::Timestamp,
            Self::Uuid(_) => ScalarKind::Uuid,
        }
    }

    /// Compares two scalars, coercing across numeric kinds and between
    /// dates and timestamps. `None` means the kinds are not comparable;
    /// pruning treats that as unknown and keeps the candidate.
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            (Self::Int64(a), Self::Int64(b)) => Some(a.cmp(b)),
            (Self::Float64(a), Self::Float64(b)) => Some(a.total_cmp(b)),
            (Self::Int64(a), Self::Float64(b)) => Some((*a as f64).total_cmp(b)),
            (Self::Float64(a), Self::Int64(b)) => Some(a.total_cmp(&(*b as f64))),
            (Self::Utf8(a), Self::Utf8(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Timestamp(b)) => {
                Some(a.and_hms_opt(0, 0, 0)?.and_utc().cmp(b))
            }
            (Self::Timestamp(a), Self::Date(b)) => {
                Some(a.cmp(&b.and_hms_opt(0, 0, 0)?.and_utc()))
            }
            (Self::Uuid(a), Self::Uuid(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Total order used to sort index arrays. Values in one index share a
    /// kind, so the cross-kind fallback only breaks ties deterministically.
    pub fn total_order(&self, other: &Self) -> Ordering {
        self.compare(other)
            .unwrap_or_else(|| kind_rank(self.kind()).cmp(&kind_rank(other.kind())))
    }

    /// Equality under the same coercion rules as [`Scalar::compare`].
    pub fn equals(&self, other: &Self) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Parses a partition value string into the target kind.
    pub fn parse(kind: ScalarKind, raw: &str) -> Result<Self> {
        let fail = || Error::Format(format!("cannot parse {raw:?} as {kind:?}"));
        match kind {
            ScalarKind::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Self::Bool(true)),
                "false" | "0" => Ok(Self::Bool(false)),
                _ => Err(fail()),
            },
            ScalarKind::Int64 => raw.parse::<i64>().map(Self::Int64).map_err(|_| fail()),
            ScalarKind::Float64 => raw.parse::<f64>().map(Self::Float64).map_err(|_| fail()),
            ScalarKind::Utf8 => Ok(Self::Utf8(raw.to_string())),
            ScalarKind::Date => parse_date(raw).map(Self::Date).ok_or_else(fail),
            ScalarKind::Timestamp => parse_timestamp(raw).map(Self::Timestamp).ok_or_else(fail),
            ScalarKind::Uuid => Uuid::parse_str(raw).map(Self::Uuid).map_err(|_| fail()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
            Self::Date(v) => write!(f, "{v}"),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Uuid(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int64(v as i64)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int64(v)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float64(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Utf8(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Utf8(v)
    }
}

impl From<NaiveDate> for Scalar {
    fn from(v: NaiveDate) -> Self {
        Scalar::Date(v)
    }
}

impl From<DateTime<Utc>> for Scalar {
    fn from(v: DateTime<Utc>) -> Self {
        Scalar::Timestamp(v)
    }
}

impl From<Uuid> for Scalar {
    fn from(v: Uuid) -> Self {
        Scalar::Uuid(v)
    }
}

fn kind_rank(kind: ScalarKind) -> u8 {
    match kind {
        ScalarKind::Bool => 0,
        ScalarKind::Int64 => 1,
        ScalarKind::Float64 => 2,
        ScalarKind::Utf8 => 3,
        ScalarKind::Date => 4,
        ScalarKind::Timestamp => 5,
        ScalarKind::Uuid => 6,
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Normalizes a partition value for comparison: values parseable as an
/// integer, a date, or a datetime are kept verbatim, everything else is
/// lowercased. Filter values go through the same rule before matching.
pub fn normalize_partition_value(raw: &str) -> String {
    if raw.parse::<i64>().is_ok() || parse_date(raw).is_some() || parse_timestamp(raw).is_some() {
        raw.to_string()
    } else {
        raw.to_lowercase()
    }
}

/// Type-directed equality between a partition value string and a filter
/// scalar: numeric-parseable values compare as numbers, date/datetime
/// values as instants, everything else as case-insensitive strings.
pub fn partition_value_matches(raw: &str, filter: &Scalar) -> bool {
    match filter {
        Scalar::Int64(v) => raw.parse::<i64>() == Ok(*v),
        Scalar::Float64(v) => raw.parse::<f64>().map(|p| p == *v).unwrap_or(false),
        Scalar::Bool(v) => matches!(Scalar::parse(ScalarKind::Bool, raw), Ok(Scalar::Bool(p)) if p == *v),
        Scalar::Date(v) => parse_date(raw) == Some(*v),
        Scalar::Timestamp(v) => parse_timestamp(raw) == Some(*v),
        Scalar::Uuid(v) => Uuid::parse_str(raw) == Ok(*v),
        Scalar::Utf8(v) => normalize_partition_value(raw) == normalize_partition_value(v),
    }
}

/// Smallest string strictly greater than every string starting with
/// `prefix`: the prefix with its last codepoint incremented, carrying into
/// shorter prefixes when the codepoint has no successor. `None` means the
/// prefix has no upper bound (empty, or all codepoints maxed out).
pub fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        // skip the surrogate gap, it is not valid char territory
        let mut candidate = last as u32 + 1;
        if (0xD800..=0xDFFF).contains(&candidate) {
            candidate = 0xE000;
        }
        if let Some(next) = char::from_u32(candidate) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

/// Decodes a plain-encoded parquet statistics value.
///
/// Raw statistics bytes are stored unparsed on [`crate::partition::ColumnStatistics`]
/// and only decoded here, at comparison time. Unknown encodings yield
/// `None`, which pruning treats as "may match".
pub fn decode_stat_value(
    bytes: &[u8],
    physical: PhysicalType,
    logical: Option<&LogicalType>,
) -> Option<Scalar> {
    match physical {
        PhysicalType::BOOLEAN => bytes.first().map(|b| Scalar::Bool(*b != 0)),
        PhysicalType::INT32 => {
            let v = i32::from_le_bytes(bytes.try_into().ok()?);
            match logical {
                Some(LogicalType::Date) => epoch_days_to_date(v).map(Scalar::Date),
                _ => Some(Scalar::Int64(v as i64)),
            }
        }
        PhysicalType::INT64 => {
            let v = i64::from_le_bytes(bytes.try_into().ok()?);
            match logical {
                Some(LogicalType::Timestamp { unit, .. }) => {
                    timestamp_from_unit(v, unit).map(Scalar::Timestamp)
                }
                _ => Some(Scalar::Int64(v)),
            }
        }
        PhysicalType::FLOAT => {
            let v = f32::from_le_bytes(bytes.try_into().ok()?);
            Some(Scalar::Float64(v as f64))
        }
        PhysicalType::DOUBLE => {
            let v = f64::from_le_bytes(bytes.try_into().ok()?);
            Some(Scalar::Float64(v))
        }
        PhysicalType::BYTE_ARRAY | PhysicalType::FIXED_LEN_BYTE_ARRAY => match logical {
            Some(LogicalType::String) | Some(LogicalType::Enum) | Some(LogicalType::Json) => {
                std::str::from_utf8(bytes).ok().map(|s| Scalar::Utf8(s.to_string()))
            }
            Some(LogicalType::Uuid) => {
                Uuid::from_slice(bytes).ok().map(Scalar::Uuid)
            }
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn epoch_days_to_date(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1970, 1, 1)?.checked_add_signed(chrono::Duration::days(days as i64))
}

pub(crate) fn timestamp_from_unit(value: i64, unit: &TimeUnit) -> Option<DateTime<Utc>> {
    match unit {
        TimeUnit::MILLIS => DateTime::from_timestamp_millis(value),
        TimeUnit::MICROS => DateTime::from_timestamp_micros(value),
        TimeUnit::NANOS => Some(DateTime::from_timestamp_nanos(value)),
    }
}
