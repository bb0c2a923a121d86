//! Ingestion error types

use thiserror::Error;

/// Ingestion error
#[derive(Debug, Error)]
pub enum IngestionError {
    /// Source configuration cannot produce samples
    #[error("invalid source {source_name}: {message}")]
    InvalidSource {
        source_name: String,
        message: String,
    },

    /// Downstream receiver dropped
    #[error("channel closed for source {source_name}")]
    ChannelClosed { source_name: String },

    /// A source with this name is already registered
    #[error("source {source_name} is already registered")]
    DuplicateSource { source_name: String },
}

/// Ingestion Result type alias
pub type Result<T> = std::result::Result<T, IngestionError>;
