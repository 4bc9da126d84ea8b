//! Record persistence contract and implementations

use crate::Record;
use async_trait::async_trait;

pub mod csv;
pub mod memory;

/// Store errors
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV read or write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Record attributes could not be encoded or decoded
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// The store refused the write
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Persists fetched records
///
/// Writes are idempotent upserts keyed by [`Record::id`]; persisting the same
/// record twice leaves one copy.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Upsert every record in `records`
    async fn persist_many(&self, records: &[Record]) -> StoreResult<()>;
}
