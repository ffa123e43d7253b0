use crate::error::{Error, Result};
use crate::row::RowView;
use crate::scalar::ScalarKind;
use lazy_static::lazy_static;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::RwLock;

/// Whether a bound field reads from parquet column data or from the
/// partition key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Data,
    Partition,
}

/// Binds one field of a row type to a physical column.
#[derive(Debug, Clone, Copy)]
pub struct ColumnBinding {
    /// Field name on the row type.
    pub field: &'static str,
    /// Parquet column name, or partition key for partition fields.
    pub column: &'static str,
    pub kind: ColumnKind,
    pub indexed: bool,
    pub value_kind: ScalarKind,
    pub nullable: bool,
}

impl ColumnBinding {
    pub fn is_partition(&self) -> bool {
        self.kind == ColumnKind::Partition
    }

    /// Partition keys compare case-insensitively; the lowercased form is
    /// the canonical one everywhere in the engine.
    pub fn partition_key(&self) -> String {
        self.column.to_lowercase()
    }
}

/// Compile-time column descriptors of a row type.
#[derive(Debug)]
pub struct TypeMetadata {
    pub type_name: &'static str,
    pub bindings: &'static [ColumnBinding],
}

impl TypeMetadata {
    pub fn binding(&self, field: &str) -> Option<&ColumnBinding> {
        self.bindings.iter().find(|b| b.field == field)
    }

    pub fn partition_bindings(&self) -> impl Iterator<Item = &ColumnBinding> {
        self.bindings.iter().filter(|b| b.is_partition())
    }

    pub fn data_bindings(&self) -> impl Iterator<Item = &ColumnBinding> {
        self.bindings.iter().filter(|b| !b.is_partition())
    }

    pub fn indexed_bindings(&self) -> impl Iterator<Item = &ColumnBinding> {
        self.bindings.iter().filter(|b| b.indexed && !b.is_partition())
    }

    /// Rejects descriptor shapes the engine cannot execute against.
    pub fn validate(&self) -> Result<()> {
        let mut seen_fields = Vec::new();
        let mut seen_partition_keys = Vec::new();
        for binding in self.bindings {
            if seen_fields.contains(&binding.field) {
                return Err(Error::SchemaMismatch(format!(
                    "{}: field {} is bound twice",
                    self.type_name, binding.field
                )));
            }
            seen_fields.push(binding.field);
            if binding.is_partition() {
                let key = binding.partition_key();
                if seen_partition_keys.contains(&key) {
                    return Err(Error::SchemaMismatch(format!(
                        "{}: partition key {} is declared twice",
                        self.type_name, key
                    )));
                }
                seen_partition_keys.push(key);
            }
        }
        Ok(())
    }
}

/// A queryable row type: compile-time column bindings plus the mapping
/// from a materialized row back into the type.
///
/// Implementations are expected to come from a derive-style generator; the
/// engine itself only consumes the two functions below.
pub trait RowType: Sized + Send + 'static {
    fn metadata() -> &'static TypeMetadata;

    /// Maps one materialized row into the type. Coercion failures
    /// (`Overflow`, `Format`, `SchemaMismatch`) propagate to the scan
    /// stream unchanged.
    fn from_row(row: &RowView<'_>) -> Result<Self>;
}

lazy_static! {
    static ref REGISTRY: RwLock<HashMap<TypeId, &'static TypeMetadata>> =
        RwLock::new(HashMap::new());
}

/// One-time publication of a row type's descriptors, keyed by type
/// identity. Re-registration is idempotent.
pub fn register<T: RowType>() -> Result<()> {
    let metadata = T::metadata();
    metadata.validate()?;
    let mut registry = REGISTRY.write().expect("type registry poisoned");
    registry.entry(TypeId::of::<T>()).or_insert(metadata);
    Ok(())
}

/// Looks up the published descriptors for `T`. Failing here is fatal to
/// table construction.
pub fn metadata_of<T: RowType>() -> Result<&'static TypeMetadata> {
    let registry = REGISTRY.read().expect("type registry poisoned");
    registry
        .get(&TypeId::of::<T>())
        .copied()
        .ok_or_else(|| Error::NoMetadata(std::any::type_name::<T>()))
}
