//! Collector client error types.

use crate::flusher::FlusherError;
use silo_metadata::MetadataError;
use thiserror::Error;

/// Collector operation errors.
///
/// Every failure names the operation it happened in; the underlying cause
/// (including affected chunks for protocol violations) rides along as the
/// error source.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("metadata store error during {operation}: {source}")]
    Metadata {
        operation: &'static str,
        #[source]
        source: MetadataError,
    },

    #[error("flusher failure during {operation}: {source}")]
    Flusher {
        operation: &'static str,
        #[source]
        source: FlusherError,
    },

    #[error("{operation} gave up after {attempts} flusher attempts: {source}")]
    FlusherExhausted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: FlusherError,
    },
}

impl CollectorError {
    pub(crate) fn metadata(operation: &'static str, source: MetadataError) -> Self {
        Self::Metadata { operation, source }
    }

    /// Whether retrying the whole operation may succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Metadata { source, .. } => source.is_retriable(),
            Self::Flusher { source, .. } => source.is_transient(),
            Self::FlusherExhausted { .. } => false,
        }
    }
}

/// Result type for collector operations.
pub type CollectorResult<T> = std::result::Result<T, CollectorError>;
