//! Out-of-band reaper for stale delete intents.

use crate::error::{CollectorError, CollectorResult};
use crate::flusher::Flusher;
use silo_core::ChunkHash;
use silo_metadata::{ChunkRepo, MetadataStore};
use std::sync::Arc;
use time::{Duration, OffsetDateTime};

/// Re-emits delete intents for chunks stuck in the deleting state.
///
/// A collector process can crash after its update transaction commits but
/// before the flusher accepts the delete intent, and the flusher itself may
/// reject intents under load. Either way the chunk row stays stamped
/// `deleting_at` with nobody working on it. The reaper periodically re-emits
/// intents for chunks that have been deleting longer than a grace period.
///
/// The grace period must comfortably exceed the resurrection handshake's
/// flush window so the reaper never races a reservation that is about to
/// clear the mark.
pub struct Reaper {
    store: Arc<dyn MetadataStore>,
    flusher: Arc<dyn Flusher>,
    grace: Duration,
    batch_size: u32,
}

impl Reaper {
    pub fn new(store: Arc<dyn MetadataStore>, flusher: Arc<dyn Flusher>) -> Self {
        Self {
            store,
            flusher,
            grace: Duration::minutes(10),
            batch_size: 500,
        }
    }

    /// Override how long a chunk may sit in deleting before re-emission.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Override how many chunks a single pass re-emits.
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Run one reaper pass; returns the number of delete intents re-emitted.
    ///
    /// Flusher rejections are logged and absorbed (the next pass retries);
    /// metadata store failures surface.
    pub async fn run_once(&self) -> CollectorResult<usize> {
        let cutoff = OffsetDateTime::now_utc() - self.grace;
        let stale = self
            .store
            .list_deleting_chunks(cutoff, self.batch_size)
            .await
            .map_err(|e| CollectorError::metadata("reap", e))?;
        if stale.is_empty() {
            return Ok(0);
        }

        let chunks: Vec<ChunkHash> = stale
            .into_iter()
            .map(|row| ChunkHash::new(row.chunk_hash))
            .collect();
        tracing::info!(
            chunks = chunks.len(),
            grace_secs = self.grace.whole_seconds(),
            "re-emitting delete intents for stale deleting chunks"
        );

        if let Err(err) = self.flusher.delete_chunks(&chunks).await {
            tracing::warn!(error = %err, "flusher rejected re-emitted delete intents");
            return Ok(0);
        }
        Ok(chunks.len())
    }
}
