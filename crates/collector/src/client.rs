//! Collector client façade.

use crate::error::{CollectorError, CollectorResult};
use crate::flusher::{Flusher, FlusherError};
use silo_core::{ChunkHash, Reference, RetryConfig};
use silo_metadata::{ChunkRepo, MetadataStore, ReferenceRepo};
use std::sync::Arc;

/// The façade producers call.
///
/// Sequences reference graph transactions with the flusher calls the deletion
/// protocol requires. Holds no graph state of its own: everything it knows is
/// derived from the metadata store and may be discarded with the process.
pub struct CollectorClient {
    store: Arc<dyn MetadataStore>,
    flusher: Arc<dyn Flusher>,
    retry: RetryConfig,
}

impl CollectorClient {
    pub fn new(store: Arc<dyn MetadataStore>, flusher: Arc<dyn Flusher>) -> Self {
        Self {
            store,
            flusher,
            retry: RetryConfig::default(),
        }
    }

    /// Override the retry policy for transient flusher failures.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Pin `chunks` under `job_id` before the producer names them from a
    /// durable parent.
    ///
    /// Chunks found scheduled for deletion are resurrected: their presence is
    /// confirmed through the flusher, then a second transaction clears the
    /// deletion mark and installs the pending job references. A chunk erased
    /// between the two phases surfaces as `ResurrectionLost`; the caller must
    /// retry the reservation, which will re-upload.
    ///
    /// Empty input returns without touching the store or the flusher.
    pub async fn reserve_chunks(&self, job_id: &str, chunks: &[ChunkHash]) -> CollectorResult<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let resurrected = self
            .store
            .reserve_chunks(job_id, chunks)
            .await
            .map_err(|e| CollectorError::metadata("reserve_chunks", e))?;
        if resurrected.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            job = job_id,
            chunks = resurrected.len(),
            "confirming presence of deleting chunks before pinning"
        );
        self.flush_deletes_with_retry("reserve_chunks", &resurrected)
            .await?;

        // The flush happened-before this transaction, so the mark cannot be
        // cleared until physical presence is confirmed.
        self.store
            .resurrect_chunks(job_id, &resurrected)
            .await
            .map_err(|e| CollectorError::metadata("reserve_chunks", e))?;
        Ok(())
    }

    /// Atomically mutate the reference graph, then hand the chunks that just
    /// became unreferenced to the flusher as delete intents.
    ///
    /// Flusher failures here are logged and absorbed: the references are
    /// already durably gone, and the reaper re-emits lost intents. Protocol
    /// violations (`MissingChunks`, `ReferenceToDeletingChunks`) surface
    /// immediately with nothing persisted.
    pub async fn update_references(
        &self,
        add: &[Reference],
        remove: &[Reference],
        release_jobs: &[String],
    ) -> CollectorResult<()> {
        if add.is_empty() && remove.is_empty() && release_jobs.is_empty() {
            return Ok(());
        }

        let to_delete = self
            .store
            .update_references(add, remove, release_jobs)
            .await
            .map_err(|e| CollectorError::metadata("update_references", e))?;
        if to_delete.is_empty() {
            return Ok(());
        }

        if let Err(err) = self.flusher.delete_chunks(&to_delete).await {
            tracing::warn!(
                error = %err,
                chunks = to_delete.len(),
                "flusher rejected delete intents; reaper will re-emit them"
            );
        }
        Ok(())
    }

    /// Administrative path: remove chunk rows whose physical erasure the
    /// flusher has confirmed, completing the Deleting -> Gone transition.
    ///
    /// Returns the number of rows removed. Rows that were resurrected or
    /// re-referenced since the confirmation are left untouched.
    pub async fn confirm_deleted(&self, chunks: &[ChunkHash]) -> CollectorResult<u64> {
        if chunks.is_empty() {
            return Ok(0);
        }
        self.store
            .purge_chunks(chunks)
            .await
            .map_err(|e| CollectorError::metadata("confirm_deleted", e))
    }

    async fn flush_deletes_with_retry(
        &self,
        operation: &'static str,
        chunks: &[ChunkHash],
    ) -> CollectorResult<()> {
        let mut attempt: u32 = 1;
        loop {
            match self.flusher.flush_deletes(chunks).await {
                Ok(()) => return Ok(()),
                Err(err @ FlusherError::Transient(_)) => {
                    if attempt >= self.retry.max_attempts.max(1) {
                        return Err(CollectorError::FlusherExhausted {
                            operation,
                            attempts: attempt,
                            source: err,
                        });
                    }
                    let delay = self.retry.delay_for(attempt);
                    tracing::debug!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient flusher failure, retrying flush"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    // A reservation over an unflushed chunk cannot be trusted.
                    return Err(CollectorError::Flusher {
                        operation,
                        source: err,
                    });
                }
            }
        }
    }
}
