//! Chunk lifecycle repository.

use crate::error::MetadataResult;
use crate::models::{ChunkRow, GraphStats, RefRow};
use async_trait::async_trait;
use silo_core::ChunkHash;
use time::OffsetDateTime;

/// Read side of the chunk lifecycle table, plus the administrative purge
/// that finishes the Deleting -> Gone transition.
#[async_trait]
pub trait ChunkRepo: Send + Sync {
    /// Get a chunk row by hash.
    async fn get_chunk(&self, chunk: &ChunkHash) -> MetadataResult<Option<ChunkRow>>;

    /// List every reference edge targeting a chunk.
    async fn list_refs_to(&self, chunk: &ChunkHash) -> MetadataResult<Vec<RefRow>>;

    /// List chunks scheduled for deletion before `older_than`, oldest first.
    ///
    /// The reaper uses this to re-emit delete intents that may have been
    /// lost with a crashed collector process.
    async fn list_deleting_chunks(
        &self,
        older_than: OffsetDateTime,
        limit: u32,
    ) -> MetadataResult<Vec<ChunkRow>>;

    /// Remove chunk rows whose physical erasure the flusher has confirmed.
    ///
    /// Guarded: a row is removed only while still marked deleting and still
    /// unreferenced, so a resurrection that raced the confirmation wins and
    /// the row survives. Returns the number of rows removed.
    async fn purge_chunks(&self, chunks: &[ChunkHash]) -> MetadataResult<u64>;

    /// Aggregate graph statistics.
    async fn stats(&self) -> MetadataResult<GraphStats>;
}
