//! Metadata store error types.

use thiserror::Error;

/// Format affected chunks for display, capping at MAX_DISPLAYED to prevent
/// log/response bloat.
fn format_chunks(chunks: &[String]) -> String {
    const MAX_DISPLAYED: usize = 5;
    if chunks.len() <= MAX_DISPLAYED {
        format!("{:?}", chunks)
    } else {
        let sample: Vec<_> = chunks.iter().take(MAX_DISPLAYED).collect();
        format!("{:?} (and {} more)", sample, chunks.len() - MAX_DISPLAYED)
    }
}

/// Metadata store operation errors.
///
/// Protocol violations (`MissingChunks`, `ReferenceToDeletingChunks`,
/// `ResurrectionLost`) indicate caller bugs and are never retried.
/// `Database` errors are split by [`MetadataError::is_retriable`] into
/// transient conflicts (serialization failures, lost connections) and
/// everything else.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(
        "cannot add references to {} unknown chunks: {} (reserve them first)",
        .chunks.len(),
        format_chunks(.chunks)
    )]
    MissingChunks { chunks: Vec<String> },

    #[error(
        "cannot add references to {} chunks scheduled for deletion: {} (reserve them first)",
        .chunks.len(),
        format_chunks(.chunks)
    )]
    ReferenceToDeletingChunks { chunks: Vec<String> },

    #[error(
        "{} chunks were erased before resurrection completed: {} (re-reserve and re-upload)",
        .chunks.len(),
        format_chunks(.chunks)
    )]
    ResurrectionLost { chunks: Vec<String> },

    #[error("{operation} gave up after {attempts} conflicting attempts: {source}")]
    ExhaustedRetries {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: Box<MetadataError>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;

/// PostgreSQL SQLSTATE codes that mean "re-run the transaction".
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

impl MetadataError {
    /// Whether the underlying failure is a serialization conflict that a
    /// fresh transaction attempt can resolve.
    pub fn is_serialization_conflict(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db_err)) => matches!(
                db_err.code().as_deref(),
                Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
            ),
            _ => false,
        }
    }

    /// Whether the failure is transient (conflict or lost connectivity) and
    /// safe to retry.
    pub fn is_retriable(&self) -> bool {
        if self.is_serialization_conflict() {
            return true;
        }
        matches!(
            self,
            Self::Database(
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Protocol(_)
            )
        )
    }
}
