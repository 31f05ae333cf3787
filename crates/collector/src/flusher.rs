//! Flusher collaborator trait.

use async_trait::async_trait;
use silo_core::ChunkHash;
use thiserror::Error;

/// Flusher operation errors.
#[derive(Debug, Error)]
pub enum FlusherError {
    /// Timeout or other transient condition; the call may be retried.
    #[error("transient flusher failure: {0}")]
    Transient(String),

    /// The flusher cannot satisfy the contract; retrying will not help.
    #[error("fatal flusher failure: {0}")]
    Fatal(String),
}

impl FlusherError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Result type for flusher operations.
pub type FlusherResult<T> = std::result::Result<T, FlusherError>;

/// The external sink that mediates object-storage presence and erasure.
///
/// The collector never touches object storage directly; it only hands the
/// flusher presence demands and delete intents. How the flusher batches,
/// defers, or fans out those operations is its own business.
#[async_trait]
pub trait Flusher: Send + Sync + 'static {
    /// Abort any in-flight deletion of the listed chunks. On successful
    /// return the chunks are certainly present in object storage and their
    /// deletion marks may be cleared.
    async fn flush_deletes(&self, chunks: &[ChunkHash]) -> FlusherResult<()>;

    /// Commit to erasing the listed chunks from object storage. The erasure
    /// may be deferred; confirmation arrives through the administrative
    /// purge path.
    async fn delete_chunks(&self, chunks: &[ChunkHash]) -> FlusherResult<()>;
}
