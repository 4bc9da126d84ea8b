//! CLI error types and conversions

use crate::batch::BatchError;
use crate::fetcher::FetchError;
use crate::identifier::IdentifierError;
use crate::store::StoreError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Identifier error
    #[error("identifier error: {0}")]
    IdentifierError(#[from] IdentifierError),

    /// Batch error
    #[error("batch error: {0}")]
    BatchError(#[from] BatchError),

    /// Fetcher error
    #[error("fetcher error: {0}")]
    FetcherError(#[from] FetchError),

    /// Store error
    #[error("store error: {0}")]
    StoreError(#[from] StoreError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Report could not be written
    #[error("output error: {0}")]
    OutputError(String),
}
