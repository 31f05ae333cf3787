//! Reference manager repository.

use crate::error::MetadataResult;
use async_trait::async_trait;
use silo_core::{ChunkHash, Reference};

/// Transactional engine over the reference graph.
///
/// Every method runs as a single serializable transaction (retried on
/// conflict), so no intermediate state is observable to concurrent callers.
#[async_trait]
pub trait ReferenceRepo: Send + Sync {
    /// Pin a set of chunks under a producer job.
    ///
    /// Each chunk gets a persistent row if it lacks one, and a
    /// (`job`, `job_id`, chunk) reference unless it is currently scheduled
    /// for deletion. Chunks found in the deleting state are returned WITHOUT
    /// a reference: they are resurrection candidates, and the caller must
    /// confirm physical presence with the flusher before completing the pin
    /// via [`ReferenceRepo::resurrect_chunks`].
    ///
    /// Empty input returns immediately with no transaction. Repeating the
    /// call with the same arguments is idempotent.
    async fn reserve_chunks(
        &self,
        job_id: &str,
        chunks: &[ChunkHash],
    ) -> MetadataResult<Vec<ChunkHash>>;

    /// Atomically add edges, remove edges, and release whole jobs, then
    /// return the chunks whose reference count just reached zero.
    ///
    /// `add` edges are logically inserted before `remove`/`release_jobs`
    /// edges are deleted, so an update that both releases a job and installs
    /// its semantic references never exposes a transient zero count. Returned
    /// chunks were stamped `deleting_at = now` in this transaction; chunks
    /// already marked deleting keep their original timestamp and are not
    /// returned again.
    ///
    /// Adding an edge whose target chunk has no row fails with
    /// `MissingChunks`; adding one whose target is scheduled for deletion
    /// fails with `ReferenceToDeletingChunks`. Both abort the transaction
    /// with nothing persisted. Duplicate adds, removes of nonexistent edges,
    /// and unknown release jobs are silently absorbed.
    async fn update_references(
        &self,
        add: &[Reference],
        remove: &[Reference],
        release_jobs: &[String],
    ) -> MetadataResult<Vec<ChunkHash>>;

    /// Second phase of the resurrection handshake: clear `deleting_at` and
    /// install the pending (`job`, `job_id`, chunk) references.
    ///
    /// Must only be called after the flusher has confirmed the chunks are
    /// physically present. If any chunk row vanished in the interim (the
    /// reaper won the race), fails with `ResurrectionLost` and persists
    /// nothing; the caller must retry the reservation from scratch.
    async fn resurrect_chunks(&self, job_id: &str, chunks: &[ChunkHash]) -> MetadataResult<()>;
}
