use std::sync::Arc;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error taxonomy surfaced by the engine.
///
/// `NotFound` on a discovered file is fatal: discovery said it existed, so
/// reading must succeed. `NotFound` on the table root yields an empty
/// partition list instead of an error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("column {column} is missing from the schema of {path}")]
    MissingColumn { column: String, path: String },

    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("format: {0}")]
    Format(String),

    #[error("numeric overflow: {0}")]
    Overflow(String),

    #[error("transport: {0}")]
    Transport(Arc<object_store::Error>),

    #[error("no metadata registered for row type {0}")]
    NoMetadata(&'static str),

    #[error("cancelled")]
    Cancelled,
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        match e {
            object_store::Error::NotFound { path, .. } => Self::NotFound(path),
            other => Self::Transport(Arc::new(other)),
        }
    }
}

impl From<parquet::errors::ParquetError> for Error {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Self::Format(e.to_string())
    }
}

impl From<arrow::error::ArrowError> for Error {
    fn from(e: arrow::error::ArrowError) -> Self {
        Self::Format(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Format(e.to_string())
    }
}
