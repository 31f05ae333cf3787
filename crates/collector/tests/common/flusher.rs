//! Mock flushers for collector tests.

use async_trait::async_trait;
use silo_collector::{Flusher, FlusherError, FlusherResult};
use silo_core::ChunkHash;
use silo_metadata::{ChunkRepo, SqliteStore};
use std::sync::{Arc, Mutex};

/// A recorded flusher invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlusherCall {
    FlushDeletes(Vec<String>),
    DeleteChunks(Vec<String>),
}

fn sorted_hashes(chunks: &[ChunkHash]) -> Vec<String> {
    let mut hashes: Vec<String> = chunks.iter().map(|c| c.as_str().to_string()).collect();
    hashes.sort();
    hashes
}

/// Records every call and always succeeds.
#[derive(Default)]
pub struct RecordingFlusher {
    calls: Mutex<Vec<FlusherCall>>,
}

impl RecordingFlusher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<FlusherCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Flusher for RecordingFlusher {
    async fn flush_deletes(&self, chunks: &[ChunkHash]) -> FlusherResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(FlusherCall::FlushDeletes(sorted_hashes(chunks)));
        Ok(())
    }

    async fn delete_chunks(&self, chunks: &[ChunkHash]) -> FlusherResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(FlusherCall::DeleteChunks(sorted_hashes(chunks)));
        Ok(())
    }
}

/// Fails a configurable number of times per operation before succeeding,
/// for exercising the transient-retry and absorbed-error paths.
pub struct FailingFlusher {
    flush_failures: Mutex<u32>,
    delete_failures: Mutex<u32>,
    fatal: bool,
    pub inner: Arc<RecordingFlusher>,
}

impl FailingFlusher {
    /// Fail `flush_failures` flushes and `delete_failures` deletes with
    /// transient errors, then succeed.
    pub fn transient(flush_failures: u32, delete_failures: u32) -> Arc<Self> {
        Arc::new(Self {
            flush_failures: Mutex::new(flush_failures),
            delete_failures: Mutex::new(delete_failures),
            fatal: false,
            inner: RecordingFlusher::new(),
        })
    }

    /// Fail every call with a fatal error.
    pub fn fatal() -> Arc<Self> {
        Arc::new(Self {
            flush_failures: Mutex::new(u32::MAX),
            delete_failures: Mutex::new(u32::MAX),
            fatal: true,
            inner: RecordingFlusher::new(),
        })
    }

    fn take_failure(&self, budget: &Mutex<u32>) -> Option<FlusherError> {
        let mut remaining = budget.lock().unwrap();
        if *remaining == 0 {
            return None;
        }
        *remaining = remaining.saturating_sub(1);
        Some(if self.fatal {
            FlusherError::Fatal("object store bucket is gone".to_string())
        } else {
            FlusherError::Transient("object store timed out".to_string())
        })
    }
}

#[async_trait]
impl Flusher for FailingFlusher {
    async fn flush_deletes(&self, chunks: &[ChunkHash]) -> FlusherResult<()> {
        if let Some(err) = self.take_failure(&self.flush_failures) {
            return Err(err);
        }
        self.inner.flush_deletes(chunks).await
    }

    async fn delete_chunks(&self, chunks: &[ChunkHash]) -> FlusherResult<()> {
        if let Some(err) = self.take_failure(&self.delete_failures) {
            return Err(err);
        }
        self.inner.delete_chunks(chunks).await
    }
}

/// Confirms erasure DURING the flush call: purges the requested rows from the
/// store before returning, so the resurrection second phase finds them gone.
/// Models the flusher completing a pending deletion just before the client
/// asked it not to.
pub struct PurgingFlusher {
    store: Arc<SqliteStore>,
}

impl PurgingFlusher {
    pub fn new(store: Arc<SqliteStore>) -> Arc<Self> {
        Arc::new(Self { store })
    }
}

#[async_trait]
impl Flusher for PurgingFlusher {
    async fn flush_deletes(&self, chunks: &[ChunkHash]) -> FlusherResult<()> {
        self.store
            .purge_chunks(chunks)
            .await
            .map_err(|e| FlusherError::Fatal(e.to_string()))?;
        Ok(())
    }

    async fn delete_chunks(&self, _chunks: &[ChunkHash]) -> FlusherResult<()> {
        Ok(())
    }
}
